use vigil_core::Severity;

/// Fixed classification table. Types not listed default to `warning` — a
/// new agent shipping a new type must not be able to page an admin until
/// someone deliberately promotes it here.
pub fn classify(alert_type: &str) -> Severity {
    match alert_type {
        "stream_started" | "recording_started" | "service_ended" => Severity::Info,

        "fps_low" | "bitrate_low" | "cpu_high" | "streamer_disconnected"
        | "mixer_disconnected" | "macrohost_disconnected" | "audio_silence"
        | "platform_no_broadcast" | "bitrate_drop" => Severity::Warning,

        "stream_stopped" | "switcher_disconnected" | "recording_failed" => Severity::Critical,

        "multiple_systems_down" | "no_td_response" => Severity::Emergency,

        _ => Severity::Warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_policy() {
        assert_eq!(classify("stream_started"), Severity::Info);
        assert_eq!(classify("service_ended"), Severity::Info);
        assert_eq!(classify("fps_low"), Severity::Warning);
        assert_eq!(classify("streamer_disconnected"), Severity::Warning);
        assert_eq!(classify("mixer_disconnected"), Severity::Warning);
        assert_eq!(classify("stream_stopped"), Severity::Critical);
        assert_eq!(classify("switcher_disconnected"), Severity::Critical);
        assert_eq!(classify("recording_failed"), Severity::Critical);
        assert_eq!(classify("multiple_systems_down"), Severity::Emergency);
        assert_eq!(classify("no_td_response"), Severity::Emergency);
    }

    #[test]
    fn unknown_types_default_to_warning() {
        assert_eq!(classify("quantum_flux_detected"), Severity::Warning);
        assert_eq!(classify(""), Severity::Warning);
    }
}
