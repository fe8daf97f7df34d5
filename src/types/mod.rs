pub mod currency;
pub mod observation;

pub use currency::*;
pub use observation::*;
