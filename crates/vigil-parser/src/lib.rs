//! `vigil-parser` — free text from a chat into a typed command envelope.
//!
//! A fixed, ordered pattern table: the first matching entry wins, so
//! specific phrasings must be declared before the generic ones they would
//! otherwise lose to ("change preview to camera 2" before "camera 2").
//! Anything that matches nothing returns `None` and the caller decides what
//! to do with the text.
//!
//! Every command name emitted here must exist in the agent's command
//! registry — the agent's tests assert that subset relation.

use regex::{Captures, Regex, RegexBuilder};
use serde_json::{json, Value};

/// A parsed command envelope, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub command: &'static str,
    pub params: Value,
}

type Extractor = fn(&Captures) -> Value;

struct Pattern {
    re: Regex,
    command: &'static str,
    extract: Extractor,
}

/// The compiled pattern table. Build once at startup and share.
pub struct Parser {
    patterns: Vec<Pattern>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        let mut patterns = Vec::with_capacity(64);
        let mut add = |pattern: &str, command: &'static str, extract: Extractor| {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|e| panic!("bad pattern for {command}: {e}"));
            patterns.push(Pattern { re, command, extract });
        };

        // -- switcher: specific phrasings before the bare "camera N" -------
        add(r"^(?:change |set |switch )?preview (?:to )?(?:camera |cam |input )?(\d+)$",
            "switcher.setPreview", input_param);
        add(r"^(?:change |set |switch )?program (?:to )?(?:camera |cam |input )?(\d+)$",
            "switcher.setProgram", input_param);
        add(r"^take (?:camera |cam |input )?(\d+)$", "switcher.setProgram", input_param);
        add(r"^(?:switch|go) to (?:camera |cam |input )(\d+)$", "switcher.setProgram", input_param);
        add(r"^(?:camera|cam) (\d+)$", "switcher.setProgram", input_param);
        add(r"^cut$", "switcher.cut", no_params);
        add(r"^(?:auto|transition|dissolve)$", "switcher.auto", no_params);
        add(r"^auto (\d+)$", "switcher.auto", |c| json!({ "rate": num(c, 1) }));
        add(r"^(?:fade to black|ftb)$", "switcher.fadeToBlack", no_params);
        add(r"^run macro (\d+)$", "switcher.runMacro", |c| json!({ "index": num(c, 1) }));
        add(r"^aux (\d+) (?:to )?(?:source |input )?(\d+)$", "switcher.setAux",
            |c| json!({ "aux": num(c, 1), "source": num(c, 2) }));
        add(r"^(?:up(?:stream)? )?key (\d+) (on|off)(?: air)?$", "switcher.setKeyerOnAir",
            |c| json!({ "keyer": num(c, 1), "on": text(c, 2).eq_ignore_ascii_case("on"), "upstream": true }));
        add(r"^(?:down(?:stream)?|dsk) key (\d+) (on|off)(?: air)?$", "switcher.setKeyerOnAir",
            |c| json!({ "keyer": num(c, 1), "on": text(c, 2).eq_ignore_ascii_case("on"), "upstream": false }));
        add(r"^(?:re)?label input (\d+) (?:as |to )(.+)$", "switcher.relabelInput",
            |c| json!({ "input": num(c, 1), "name": text(c, 2) }));

        // -- streamer ------------------------------------------------------
        add(r"^start stream(?:ing)?$", "streamer.startStream", no_params);
        add(r"^go live$", "streamer.startStream", no_params);
        add(r"^(?:stop|end) (?:the )?stream(?:ing)?$", "streamer.stopStream", no_params);
        add(r"^start record(?:ing)?$", "streamer.startRecord", no_params);
        add(r"^stop record(?:ing)?$", "streamer.stopRecord", no_params);
        add(r"^(?:switch )?scene (?:to )?(.+)$", "streamer.setScene",
            |c| json!({ "scene": text(c, 1) }));
        add(r"^reduce bitrate(?: by (\d+)\s*%?)?$", "streamer.reduceBitrate",
            |c| json!({ "percent": c.get(1).map(|m| m.as_str().parse::<u64>().unwrap_or(20)).unwrap_or(20) }));

        // -- slides --------------------------------------------------------
        add(r"^next slide$", "slides.next", no_params);
        add(r"^(?:previous|prev|last) slide$", "slides.previous", no_params);
        add(r"^(?:go to )?slide (\d+)$", "slides.goto", |c| json!({ "index": num(c, 1) }));
        add(r"^advance(?: the)? slides?$", "slides.next", no_params);

        // -- router: specific form first -----------------------------------
        add(r"^route (?:input )?(\d+) to (?:output )?(\d+)$", "router.route",
            |c| json!({ "input": num(c, 1), "output": num(c, 2) }));
        add(r"^send (?:input )?(\d+) to (?:output )?(\d+)$", "router.route",
            |c| json!({ "input": num(c, 1), "output": num(c, 2) }));
        add(r"^output (\d+) (?:from |shows )(?:input )?(\d+)$", "router.route",
            |c| json!({ "input": num(c, 2), "output": num(c, 1) }));

        // -- mixer ---------------------------------------------------------
        add(r"^mute (?:channel|ch) (\d+)$", "mixer.muteChannel",
            |c| json!({ "channel": num(c, 1) }));
        add(r"^unmute (?:channel|ch) (\d+)$", "mixer.unmuteChannel",
            |c| json!({ "channel": num(c, 1) }));
        add(r"^mute (?:the )?(?:main|master)(?: bus)?$", "mixer.muteMain", no_params);
        add(r"^unmute (?:the )?(?:main|master)(?: bus)?$", "mixer.unmuteMain", no_params);
        add(r"^(?:set )?fader (\d+) to (\d+(?:\.\d+)?)\s*%?$", "mixer.setFader",
            |c| json!({ "channel": num(c, 1), "level": percent_level(c, 2) }));
        add(r"^(?:set )?(?:main|master) (?:fader|volume) to (\d+(?:\.\d+)?)\s*%?$",
            "mixer.setMainFader", |c| json!({ "level": percent_level(c, 1) }));

        // -- macro host ----------------------------------------------------
        add(r"^(?:press|push|hit) (?:the )?(.+?)(?: button)?$", "macrohost.press",
            |c| json!({ "name": text(c, 1) }));

        // -- preview / system: before the visuals catch-alls, which would
        //    otherwise swallow "show me the stream" as a clip name ---------
        add(r"^start preview$", "preview.start", no_params);
        add(r"^stop preview$", "preview.stop", no_params);
        add(r"^(?:screenshot|snapshot)$", "preview.snapshot", no_params);
        add(r"^(?:show me|what does) the stream(?: look like)?\??$", "preview.snapshot", no_params);
        add(r"^status$", "system.status", no_params);
        add(r"^(?:how (?:are|is) (?:things|everything|it going)|everything ok)\??$",
            "system.status", no_params);
        add(r"^(?:run (?:a )?)?pre[- ]?service check$", "system.preServiceCheck", no_params);
        add(r"^(?:run (?:a )?)?(?:system )?check(?:up)?$", "system.preServiceCheck", no_params);
        add(r"^uptime$", "system.uptime", no_params);

        // -- visuals -------------------------------------------------------
        add(r"^(?:trigger|fire) column (.+)$", "visuals.triggerColumn",
            |c| json!({ "name": text(c, 1) }));
        add(r"^(?:play|show) (?:clip )?(.+)$", "visuals.playClip",
            |c| json!({ "name": text(c, 1) }));

        Self { patterns }
    }

    /// Try the table in declaration order; first match wins.
    pub fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        for pattern in &self.patterns {
            if let Some(captures) = pattern.re.captures(trimmed) {
                return Some(ParsedCommand {
                    command: pattern.command,
                    params: (pattern.extract)(&captures),
                });
            }
        }
        None
    }

    /// All command names the table can emit (for registry coverage tests).
    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.patterns.iter().map(|p| p.command).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

fn no_params(_c: &Captures) -> Value {
    Value::Null
}

fn input_param(c: &Captures) -> Value {
    json!({ "input": num(c, 1) })
}

fn num(c: &Captures, i: usize) -> u64 {
    c.get(i)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn text(c: &Captures, i: usize) -> String {
    c.get(i).map(|m| m.as_str().trim().to_string()).unwrap_or_default()
}

/// Fader levels arrive as percentages in chat ("75") but drivers take 0–1.
fn percent_level(c: &Captures, i: usize) -> f64 {
    let raw: f64 = c
        .get(i)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    if raw > 1.0 {
        (raw / 100.0).min(1.0)
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<ParsedCommand> {
        Parser::new().parse(text)
    }

    #[test]
    fn preview_phrasing_wins_over_bare_camera() {
        let parsed = parse("change preview to camera 3").unwrap();
        assert_eq!(parsed.command, "switcher.setPreview");
        assert_eq!(parsed.params["input"], 3);

        let parsed = parse("camera 3").unwrap();
        assert_eq!(parsed.command, "switcher.setProgram");
        assert_eq!(parsed.params["input"], 3);
    }

    #[test]
    fn case_and_whitespace_are_forgiven() {
        let parsed = parse("  TAKE CAMERA 2  ").unwrap();
        assert_eq!(parsed.command, "switcher.setProgram");
        assert_eq!(parsed.params["input"], 2);
    }

    #[test]
    fn route_extracts_both_directions() {
        let parsed = parse("route 4 to 1").unwrap();
        assert_eq!(parsed.command, "router.route");
        assert_eq!(parsed.params["input"], 4);
        assert_eq!(parsed.params["output"], 1);

        let parsed = parse("output 2 from input 7").unwrap();
        assert_eq!(parsed.params["input"], 7);
        assert_eq!(parsed.params["output"], 2);
    }

    #[test]
    fn fader_levels_normalise_to_unit_range() {
        let parsed = parse("set fader 5 to 75%").unwrap();
        assert_eq!(parsed.command, "mixer.setFader");
        assert_eq!(parsed.params["channel"], 5);
        assert_eq!(parsed.params["level"], 0.75);

        let parsed = parse("master volume to 50").unwrap();
        assert_eq!(parsed.command, "mixer.setMainFader");
        assert_eq!(parsed.params["level"], 0.5);
    }

    #[test]
    fn reduce_bitrate_defaults_to_twenty_percent() {
        let parsed = parse("reduce bitrate").unwrap();
        assert_eq!(parsed.params["percent"], 20);
        let parsed = parse("reduce bitrate by 35%").unwrap();
        assert_eq!(parsed.params["percent"], 35);
    }

    #[test]
    fn button_press_strips_the_suffix() {
        let parsed = parse("press the stinger button").unwrap();
        assert_eq!(parsed.command, "macrohost.press");
        assert_eq!(parsed.params["name"], "stinger");
    }

    #[test]
    fn keyer_direction_and_polarity() {
        let parsed = parse("key 1 on").unwrap();
        assert_eq!(parsed.command, "switcher.setKeyerOnAir");
        assert_eq!(parsed.params["upstream"], true);
        assert_eq!(parsed.params["on"], true);

        let parsed = parse("dsk key 2 off").unwrap();
        assert_eq!(parsed.params["upstream"], false);
        assert_eq!(parsed.params["on"], false);
    }

    #[test]
    fn ambiguous_text_returns_none() {
        assert!(parse("hello there").is_none());
        assert!(parse("can you maybe do the thing").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn table_is_roughly_fifty_patterns() {
        let parser = Parser::new();
        assert!((40..=60).contains(&parser.pattern_count()));
    }

    #[test]
    fn preview_request_is_not_a_clip_name() {
        let parsed = parse("show me the stream").unwrap();
        assert_eq!(parsed.command, "preview.snapshot");
        // Generic clip playback still works.
        let parsed = parse("play countdown").unwrap();
        assert_eq!(parsed.command, "visuals.playClip");
        assert_eq!(parsed.params["name"], "countdown");
    }

    #[test]
    fn status_small_talk_variants() {
        assert_eq!(parse("status").unwrap().command, "system.status");
        assert_eq!(parse("how are things?").unwrap().command, "system.status");
        assert_eq!(parse("everything ok?").unwrap().command, "system.status");
    }
}
