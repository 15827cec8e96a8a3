#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use posefit_geometry as geometry;

#[doc(inline)]
pub use posefit_registration as registration;
