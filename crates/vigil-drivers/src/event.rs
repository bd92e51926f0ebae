/// Change notifications pushed from drivers onto the agent's event bus.
///
/// The agent folds these into its telemetry snapshot and may broadcast an
/// out-of-cycle `status_update` when one arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Any subtree of switcher state changed.
    SwitcherState,
    RouteChanged { output: u32, input: u32 },
    StreamStateChanged { streaming: bool },
    RecordStateChanged { recording: bool },
    SlideChanged { index: u32, total: u32 },
    Connected { device: &'static str },
    Disconnected { device: &'static str },
}
