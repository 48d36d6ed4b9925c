pub mod imager;

pub use imager::SyntheticImager;
