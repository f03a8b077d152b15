use crate::config::DestinationConfig;
use crate::models::{Destination, Os, StoreKind};

/// Value of the `os` override query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedTarget {
    Ios,
    Android,
    Fallback,
}

impl ForcedTarget {
    /// Parse the override; unknown values are ignored
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "ios" => Some(ForcedTarget::Ios),
            "android" => Some(ForcedTarget::Android),
            "fallback" => Some(ForcedTarget::Fallback),
            _ => None,
        }
    }

    pub fn os(self) -> Os {
        match self {
            ForcedTarget::Ios => Os::Ios,
            ForcedTarget::Android => Os::Android,
            ForcedTarget::Fallback => Os::Other,
        }
    }
}

/// Pick the destination for an OS; an override wins over classification
pub fn select_destination(
    config: &DestinationConfig,
    os: Os,
    forced: Option<ForcedTarget>,
) -> Destination {
    match forced.map(ForcedTarget::os).unwrap_or(os) {
        Os::Ios => Destination {
            target: config.ios_url.clone(),
            store_kind: StoreKind::Appstore,
        },
        Os::Android => Destination {
            target: config.android_url.clone(),
            store_kind: StoreKind::Playstore,
        },
        Os::Other => Destination {
            target: config.fallback_url.clone(),
            store_kind: StoreKind::Fallback,
        },
    }
}
