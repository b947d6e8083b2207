//! S7CommPlus data model.
//!
//! - [`vlq`] - variable-length integer codec
//! - `Datatype` / `Softdatatype` - wire and program type identifiers
//! - `Value` - tagged wire values and containers
//! - `PlcValue` - typed program values with packed layouts
//! - `Object` - device objects with attributes, children and relations
//! - `ItemAddress` - variable addresses
//! - [`ids`] - object/class/attribute catalog

mod address;
mod datatype;
pub mod ids;
mod object;
mod plc;
mod value;
pub mod vlq;
pub(crate) mod wire;

pub use address::*;
pub use datatype::*;
pub use object::*;
pub use plc::*;
pub use value::*;
