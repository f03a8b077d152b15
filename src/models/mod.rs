pub mod scan;

pub use scan::{
    Browser, ClientProfile, Destination, Os, ScanEvent, StoreKind, TrackingParams,
};
