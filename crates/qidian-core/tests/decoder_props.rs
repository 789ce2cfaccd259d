use proptest::prelude::*;
use qidian_core::{FrameDecoder, Framing, PlaybackScheduler, StreamEvent};
use serde_json::json;

const CONCRETE: &str = concat!(
    "{\"type\":\"delta\",\"data\":\"Hi\"}\n",
    "{\"type\":\"delta\",\"data\":\" there\"}\n",
    "{\"type\":\"done\"}\n",
);

fn decode(framing: Framing, body: &[u8], cuts: &[usize]) -> Vec<StreamEvent> {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (body.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut decoder = FrameDecoder::new(framing);
    let mut events = Vec::new();
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(body.len())) {
        if cut > start {
            events.extend(decoder.feed(&body[start..cut]));
            start = cut;
        }
    }
    decoder.finalize();
    events
}

fn body_for(framing: Framing, deltas: &[String], garbage: bool) -> String {
    let mut body = String::new();
    for (i, delta) in deltas.iter().enumerate() {
        let line = json!({"type": "delta", "data": delta}).to_string();
        match framing {
            Framing::LineJson => body.push_str(&format!("{line}\n")),
            Framing::FieldFramed => body.push_str(&format!("event: message\r\ndata: {line}\r\n\r\n")),
        }
        if garbage && i == 0 {
            match framing {
                Framing::LineJson => body.push_str("{\"type\":\"delta\",\"data\n"),
                Framing::FieldFramed => body.push_str("data: {truncated\r\n\r\n"),
            }
        }
    }
    match framing {
        Framing::LineJson => body.push_str("{\"type\":\"done\"}\n"),
        Framing::FieldFramed => body.push_str("data: [DONE]\r\n\r\n"),
    }
    body
}

/// Decode and play back the body, returning the fully drained display.
fn play(body: &[u8], cuts: &[usize]) -> String {
    let mut scheduler = PlaybackScheduler::new();
    scheduler.update("", true);
    let mut received = String::new();
    for event in decode(Framing::LineJson, body, cuts) {
        if let StreamEvent::Delta(text) = event {
            received.push_str(&text);
            scheduler.update(&received, true);
            scheduler.tick();
        }
    }
    while scheduler.tick().is_some() {}
    scheduler.displayed().to_string()
}

#[test]
fn test_concrete_scenario_every_two_way_split() {
    let body = CONCRETE.as_bytes();
    for cut in 0..=body.len() {
        assert_eq!(play(body, &[cut]), "Hi there", "split at {cut}");
    }
}

#[test]
fn test_concrete_scenario_inside_there() {
    let body = CONCRETE.as_bytes();
    let inside = CONCRETE.find("there").unwrap() + 2;
    assert_eq!(play(body, &[inside, inside + 1, inside + 2]), "Hi there");
}

#[test]
fn test_concrete_scenario_byte_at_a_time() {
    let body = CONCRETE.as_bytes();
    let cuts: Vec<usize> = (1..body.len()).collect();
    assert_eq!(play(body, &cuts), "Hi there");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn line_json_is_partition_independent(
        deltas in prop::collection::vec("[a-zA-Z0-9 \"\\\\é你好🙂\n]{0,12}", 1..8),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
        garbage in any::<bool>(),
    ) {
        let body = body_for(Framing::LineJson, &deltas, garbage);
        let whole = decode(Framing::LineJson, body.as_bytes(), &[]);
        let split = decode(Framing::LineJson, body.as_bytes(), &cuts);
        prop_assert_eq!(&whole, &split);
        prop_assert_eq!(whole.len(), deltas.len() + 1);
        prop_assert_eq!(whole.last(), Some(&StreamEvent::Done));
    }

    #[test]
    fn field_framed_is_partition_independent(
        deltas in prop::collection::vec("[a-zA-Z0-9 \"\\\\é你好🙂\n]{0,12}", 1..8),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
        garbage in any::<bool>(),
    ) {
        let body = body_for(Framing::FieldFramed, &deltas, garbage);
        let whole = decode(Framing::FieldFramed, body.as_bytes(), &[]);
        let split = decode(Framing::FieldFramed, body.as_bytes(), &cuts);
        prop_assert_eq!(&whole, &split);
        prop_assert_eq!(whole.len(), deltas.len() + 1);
    }

    #[test]
    fn playback_reveals_exactly_what_was_received(
        deltas in prop::collection::vec("[a-z 你好🙂]{0,40}", 1..10),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
    ) {
        let body = body_for(Framing::LineJson, &deltas, false);
        prop_assert_eq!(play(body.as_bytes(), &cuts), deltas.concat());
    }
}
