mod common;

use std::{collections::HashMap, sync::Arc, thread, time::Duration};

use common::{decode_wav, FakeLoader, Harness};
use torchts::{
    generate::{multi_session_id, single_session_id, AudioMeta},
    GenerationError, ModelError, MultiRequest, SessionTracker, SingleRequest,
};

fn single(text: &str, voice: &str, chunk_id: usize) -> SingleRequest {
    SingleRequest { text: text.into(), voice: voice.into(), chunk_id, speed: 1.0 }
}

fn speakers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn single_chunk_reports_chunk_metadata() {
    let h = Harness::new(FakeLoader::new(2, 100), 400);
    let audio = h.generator.generate_single(&single("Hello. World.", "a_test", 0)).unwrap();

    assert_eq!(audio.meta, AudioMeta::Single { total_chunks: 1, current_chunk: 0 });
    assert_eq!(audio.session_id, single_session_id("a_test", "Hello. World."));
    assert_eq!(h.loader.texts(), vec!["Hello. World.".to_string()]);

    let pcm = decode_wav(&audio.wav);
    assert_eq!(pcm.len(), 200);
    assert!(pcm.iter().all(|&s| s == i16::MAX));

    // Last chunk served: nothing left to cancel.
    assert!(!h.sessions.is_active(&audio.session_id));
}

#[test]
fn chunk_index_out_of_range_is_rejected() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let err = h.generator.generate_single(&single("Hello. World.", "a_test", 1)).unwrap_err();
    assert!(matches!(err, GenerationError::Validation(ref m) if m.contains("Invalid chunk ID")));
    assert!(h.sessions.is_empty());
    assert_eq!(h.loader.loads(), 0);
}

#[test]
fn chunk_walk_keeps_session_until_last_chunk() {
    let text = "One. Two. Three.";
    let h = Harness::new(FakeLoader::new(1, 10), 5);
    let id = single_session_id("bf_test", text);

    for chunk_id in 0..2 {
        let audio = h.generator.generate_single(&single(text, "bf_test", chunk_id)).unwrap();
        assert_eq!(audio.meta, AudioMeta::Single { total_chunks: 3, current_chunk: chunk_id });
        assert!(h.sessions.is_active(&id));
    }
    h.generator.generate_single(&single(text, "bf_test", 2)).unwrap();
    assert!(!h.sessions.is_active(&id));
    assert_eq!(h.loader.texts(), vec!["One.", "Two.", "Three."]);
}

#[test]
fn abandoned_chunk_walks_expire() {
    let sessions = Arc::new(SessionTracker::with_ttl(Duration::from_millis(50)));
    let h = Harness::with_sessions(FakeLoader::new(1, 10), 5, sessions);

    for i in 0..20 {
        let text = format!("Walk {i}. Two. Three.");
        h.generator.generate_single(&single(&text, "af_test", 0)).unwrap();
    }
    assert_eq!(h.sessions.len(), 20);

    thread::sleep(Duration::from_millis(120));
    h.generator.generate_single(&single("Done.", "af_test", 0)).unwrap();
    assert!(h.sessions.is_empty());
}

#[test]
fn bad_voice_fails_before_loading() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    for voice in ["", "a", "q_nobody"] {
        let err = h.generator.generate_single(&single("Hi.", voice, 0)).unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)), "voice {voice:?}");
    }
    assert_eq!(h.loader.loads(), 0);
    assert!(h.sessions.is_empty());
}

#[test]
fn empty_text_is_rejected() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let err = h.generator.generate_single(&single("   ", "a_test", 0)).unwrap_err();
    assert!(matches!(err, GenerationError::Validation(_)));
}

#[test]
fn stop_after_first_buffer_cancels_generation() {
    let text = "First part. Second part. Third part.";
    let sessions = Arc::new(SessionTracker::new());
    let id = single_session_id("a_test", text);
    let hook = {
        let sessions = Arc::clone(&sessions);
        let id = id.clone();
        Arc::new(move |n: usize| {
            if n == 1 {
                sessions.end(&id);
            }
        })
    };
    let h = Harness::with_sessions(FakeLoader::new(3, 10).with_hook(hook), 400, sessions);

    let err = h.generator.generate_single(&single(text, "a_test", 0)).unwrap_err();
    assert!(matches!(err, GenerationError::Cancelled));
    assert_eq!(err.public_message(), "Client cancelled request");
    // The stream was abandoned right after the first buffer.
    assert_eq!(h.loader.produced(), 1);
    assert!(!h.sessions.is_active(&id));
}

#[test]
fn multi_speaker_audio_is_concatenated_in_order() {
    let h = Harness::new(FakeLoader::new(2, 50), 400);
    let text = "1 Hello there >>> 2 Good day";
    let req = MultiRequest {
        text: text.into(),
        speakers: speakers(&[("1", "a_voice"), ("2", "b_voice")]),
        speed: 1.0,
    };
    let audio = h.generator.generate_multi(&req).unwrap();

    assert_eq!(audio.meta, AudioMeta::Multi { segment_count: 2 });
    assert_eq!(audio.session_id, multi_session_id(text));
    assert_eq!(h.loader.texts(), vec!["Hello there", "Good day"]);

    let pcm = decode_wav(&audio.wav);
    assert_eq!(pcm.len(), 200);
    // American English is emitted at twice the level of British English.
    assert!(pcm[..100].iter().all(|&s| s == i16::MAX));
    assert!(pcm[100..].iter().all(|&s| s == i16::MAX / 2));
    assert!(h.sessions.is_empty());
}

#[test]
fn multi_speaker_voices_are_checked_before_synthesis() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let req = MultiRequest {
        text: "alice Hi. >>> bob Hello.".into(),
        speakers: speakers(&[("alice", "af_bella")]),
        speed: 1.0,
    };
    let err = h.generator.generate_multi(&req).unwrap_err();
    assert!(matches!(err, GenerationError::Validation(ref m) if m.contains("bob")));
    assert!(h.loader.texts().is_empty());
    assert!(h.sessions.is_empty());
}

#[test]
fn multi_speaker_without_segments_is_rejected() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let req = MultiRequest { text: ">>> <<<".into(), speakers: HashMap::new(), speed: 1.0 };
    let err = h.generator.generate_multi(&req).unwrap_err();
    assert!(matches!(err, GenerationError::Validation(ref m) if m.contains("No valid segments")));
}

#[test]
fn multi_speaker_stop_skips_remaining_chunks() {
    let text = "1 One. Two. Three. >>> 2 Four.";
    let sessions = Arc::new(SessionTracker::new());
    let id = multi_session_id(text);
    let hook = {
        let sessions = Arc::clone(&sessions);
        let id = id.clone();
        Arc::new(move |n: usize| {
            if n == 2 {
                sessions.end(&id);
            }
        })
    };
    let h = Harness::with_sessions(FakeLoader::new(1, 10).with_hook(hook), 5, sessions);
    let req = MultiRequest {
        text: text.into(),
        speakers: speakers(&[("1", "a_x"), ("2", "b_y")]),
        speed: 1.0,
    };
    let err = h.generator.generate_multi(&req).unwrap_err();
    assert!(matches!(err, GenerationError::Cancelled));
    assert_eq!(h.loader.texts(), vec!["One.", "Two."]);
}

#[test]
fn backend_failure_is_reported_generically() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    let req = single("Please explode now.", "a_test", 0);
    let err = h.generator.generate_single(&req).unwrap_err();
    assert!(matches!(err, GenerationError::Unexpected(_)));
    assert_eq!(err.public_message(), "Audio generation failed");
    assert!(h.sessions.is_empty());
    // A failed request does not unload the model.
    assert!(h.models.status().model_loaded);
}

#[test]
fn load_failure_is_a_resource_error() {
    let h = Harness::new(FakeLoader::new(1, 10).failing(), 400);
    let err = h.generator.generate_single(&single("Hi.", "a_test", 0)).unwrap_err();
    assert!(matches!(err, GenerationError::Resource(ModelError::LoadFailed(_))));
    assert!(h.sessions.is_empty());
    assert!(!h.models.status().model_loaded);
}

#[test]
fn stop_reports_whether_session_was_active() {
    let h = Harness::new(FakeLoader::new(1, 10), 400);
    h.sessions.begin("abc");
    assert!(h.generator.stop("abc"));
    assert!(!h.generator.stop("abc"));
}

#[test]
fn concurrent_requests_share_one_load() {
    let h = Harness::new(FakeLoader::new(2, 10), 400);
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let generator = Arc::clone(&h.generator);
            thread::spawn(move || {
                let voice = if i % 2 == 0 { "af_one" } else { "bm_two" };
                generator.generate_single(&single(&format!("Request number {i}."), voice, 0))
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(h.loader.loads(), 1);
    assert_eq!(h.models.status().active_leases, 0);
}
