//! Reference detectors.
//!
//! Lightweight pixel-statistic heuristics standing in for real inference
//! backends, in the spirit of a stub backend: each implements the same
//! `Detector` contract a model-backed implementation would, so swapping in
//! ONNX/Tract-style inference later touches nothing but the registration
//! site. Good enough to drive demos and integration tests through real
//! confirmation cycles; not vision research.

mod fire;
mod hands_pockets;
mod people_counter;
mod phone;
mod stats;
mod stub;

pub use fire::FireDetector;
pub use hands_pockets::HandsInPocketsDetector;
pub use people_counter::PeopleCounter;
pub use phone::PhoneDetector;
pub use stub::StubDetector;

use crate::detect::Detector;

/// Construct a reference detector by its registered id.
pub fn detector_for_id(id: &str) -> Option<Box<dyn Detector>> {
    match id {
        "fire" => Some(Box::new(FireDetector::new())),
        "phone" => Some(Box::new(PhoneDetector::new())),
        "hands_in_pockets" => Some(Box::new(HandsInPocketsDetector::new())),
        "people_counter" => Some(Box::new(PeopleCounter::new())),
        _ => None,
    }
}
