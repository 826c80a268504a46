//! Public URL composition and temporary URL signing for Swift objects.
//!
//! Nothing in this crate performs I/O; the only impure input is the "now"
//! that callers pass to [`TempUrlConfig::signed_url`].

mod compose;
mod encode;
mod temp_url;

pub use self::{
  compose::{
    BaseUrlSource, BaseUrlSpec, ComposeError, ObjectLocation, compose_url,
  },
  encode::{encode_object_name, encode_segment},
  temp_url::{
    InvalidTempUrlKey, SigningUnavailable, TempUrlConfig, TempUrlDigest,
    TempUrlKey, TempUrlMethod, sign,
  },
};
