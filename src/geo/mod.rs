pub mod locator;
pub mod qrz;
pub mod resolver;

pub use locator::PrefixTable;
pub use qrz::QrzSession;
pub use resolver::GeoResolver;
