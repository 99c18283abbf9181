use serde::Serialize;

/// Point-in-time view of a loop player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopStatus {
    pub resource: String,
    pub playing: bool,
    pub volume: f32,
    pub speed: f32,
    pub speed_increment: f32,
    pub muted: bool,
    /// Loop boundaries crossed since creation.
    pub loops: u64,
    pub closed: bool,
    pub fault: Option<String>,
}
