mod attribute;
mod types;

pub use attribute::{Attribute, VendorAttribute};
pub use types::{AttributeType, MICROSOFT_VENDOR_ID, MsVendorType};
