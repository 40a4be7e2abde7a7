//! Gradient curve textures fetched from a remote service.
//!
//! Lookups are cache-first: an in-memory map of decoded textures, then a
//! durable key/value store holding the encoded images, and only then the
//! network. Network fetches run on a bounded pool of worker threads and are
//! delivered back to the caller through a channel so the render loop never
//! blocks on them.
//!
//! - `CurveCache` owns the layers and the fetch pool.
//! - `CurveRequester` is a per-consumer handle with its own delivery channel
//!   and "latest request wins" bookkeeping.
//! - `CurveClient` talks HTTP; `CurveService` lets tests substitute it.
//! - `DiskStore` is the durable layer, bounded with least-recently-used
//!   eviction.

mod cache;
mod client;
mod texture;
mod queue;
mod store;

use std::fmt;
use std::str::FromStr;

use rand::Rng;

pub use cache::{CacheSettings, CurveCache, CurveDelivery, CurveRequest, CurveRequester, Ticket};
pub use client::{BatchCurve, CurveClient, CurveService, FetchError, OfflineService, RetryPolicy};
pub use texture::{
    decode_data_url, decode_image, encode_data_url, ImageDecodeError, TextureHandle, TextureImage,
};
pub use queue::{FetchPool, QueueState, RequestQueue};
pub use store::{DiskStore, DurableStore, MemoryStore, StoreError};

/// Largest id the curve service hands out.
pub const MAX_CURVE_ID: u32 = 9999;

/// Curves requested from the batch endpoint for quick selection.
pub const SWATCH_SLOTS: usize = 6;

const STORE_PREFIX: &str = "curve_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurveId(pub u32);

impl CurveId {
    pub fn new(id: u32) -> Self {
        CurveId(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Key under which the encoded image lives in the durable store.
    pub fn store_key(self) -> String {
        format!("{STORE_PREFIX}{}", self.0)
    }

    pub fn from_store_key(key: &str) -> Option<Self> {
        key.strip_prefix(STORE_PREFIX)?.parse().ok().map(CurveId)
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        CurveId(rng.gen_range(1..=MAX_CURVE_ID))
    }

    /// Ids within `radius` of this one: those above in ascending order, then
    /// those below in ascending order.
    /// Ids outside `1..=MAX_CURVE_ID` are omitted.
    pub fn neighbours(self, radius: u32) -> Vec<CurveId> {
        let mut ids = Vec::with_capacity(radius as usize * 2);
        for offset in 1..=radius {
            if let Some(up) = self.0.checked_add(offset).filter(|id| *id <= MAX_CURVE_ID) {
                ids.push(CurveId(up));
            }
        }
        for offset in (1..=radius).rev() {
            if let Some(down) = self.0.checked_sub(offset).filter(|id| *id >= 1) {
                ids.push(CurveId(down));
            }
        }
        ids
    }
}

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CurveId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|err| format!("invalid curve id '{s}': {err}"))?;
        if value == 0 || value > MAX_CURVE_ID {
            return Err(format!("curve id must be within 1..={MAX_CURVE_ID}, got {value}"));
        }
        Ok(CurveId(value))
    }
}
