// Sensor snapshot types carried by the wire protocol.
//
// These are the typed payloads of the two inbound sensor reports
// (`ForceSensorReport`, `RotatorReport`) and of the outbound
// `RotationRequest`. The server keeps the latest value of each per session
// (`simly_server::session`) and hands copies to event consumers, so both are
// small `Copy` structs.

use serde::{Deserialize, Serialize};

/// Four-quadrant force plate reading. Raw sensor counts, unitless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForceSensor {
    pub front: u32,
    pub back: u32,
    pub left: u32,
    pub right: u32,
}

/// Rotator state, addressed by device type and id on the client side.
///
/// `kind` is the wire field named "type"; it is opaque to the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RotatorSensor {
    pub kind: u16,
    pub id: u16,
    pub rotation: i32,
}
