pub mod egress;
pub mod ingress;

pub use egress::{EgressReader, EgressWriter};
pub use ingress::{IngressReader, IngressWriter};
