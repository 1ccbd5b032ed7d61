use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use podcastgen_core::audio::codec::{self, Pcm};
use podcastgen_core::{
    AudioFormat, Config, FailureMode, GenerationEvent, GenerationRequest, ParseErrorKind,
    PodcastError, PodcastGenerator, SpeechSynthesizer, SynthesisRequest,
};
use tokio_util::sync::CancellationToken;

const RATE: u32 = 8_000;
/// 100 ms per clip.
const CLIP_FRAMES: usize = 800;

/// Renders each segment as a constant tone whose value is `index + 1`.
#[derive(Default)]
struct ToneSynth {
    fail: HashSet<usize>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<SynthesisRequest>>,
}

#[async_trait]
impl SpeechSynthesizer for ToneSynth {
    fn output_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> podcastgen_core::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        // pseudo-random latency so completions interleave
        let delay = self
            .delay
            .unwrap_or_else(|| Duration::from_millis(((request.index * 7919) % 23) as u64));
        tokio::time::sleep(delay).await;

        if self.fail.contains(&request.index) {
            return Err(PodcastError::TtsError("voice unavailable".to_string()));
        }
        Ok(tone(request.index as i16 + 1))
    }
}

/// Returns the same pre-rendered payload for every segment.
struct FixedSynth {
    format: AudioFormat,
    payload: Vec<u8>,
}

#[async_trait]
impl SpeechSynthesizer for FixedSynth {
    fn output_format(&self) -> AudioFormat {
        self.format
    }

    async fn synthesize(&self, _request: &SynthesisRequest) -> podcastgen_core::Result<Vec<u8>> {
        Ok(self.payload.clone())
    }
}

/// A float WAV whose header probes fine but whose samples are all NaN.
fn nan_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
        for _ in 0..CLIP_FRAMES {
            writer.write_sample(f32::NAN).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf
}

/// 300 ms of a 440 Hz sine, LAME encoded.
fn mp3_tone() -> Vec<u8> {
    let rate = 44_100;
    let samples = (0..rate * 3 / 10)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / rate as f32).sin() * 0.5)
        .collect();
    let pcm = Pcm {
        samples,
        channels: 1,
        sample_rate: rate,
    };
    codec::encode(&pcm, AudioFormat::Mp3, 128).unwrap().bytes().to_vec()
}

fn tone(value: i16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
        for _ in 0..CLIP_FRAMES {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf
}

fn samples(bytes: &[u8]) -> Vec<i16> {
    hound::WavReader::new(Cursor::new(bytes))
        .unwrap()
        .into_samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

/// Distinct non-silent runs, in playback order.
fn runs(samples: &[i16]) -> Vec<i16> {
    let mut runs: Vec<i16> = Vec::new();
    for s in samples.iter().copied().filter(|s| *s != 0) {
        if runs.last() != Some(&s) {
            runs.push(s);
        }
    }
    runs
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.retry_backoff_ms = 1;
    config.pipeline.mastering = false;
    config
}

fn script_of(n: usize) -> String {
    (0..n)
        .map(|i| {
            let speaker = if i % 2 == 0 { "HOST" } else { "GUEST" };
            format!("[{speaker}|calm] This is line {i}.\n")
        })
        .collect()
}

fn generator(synth: &Arc<ToneSynth>, config: Config) -> PodcastGenerator {
    PodcastGenerator::new(config, Arc::clone(synth) as Arc<dyn SpeechSynthesizer>)
}

#[tokio::test]
async fn assembles_segments_in_script_order() {
    let synth = Arc::new(ToneSynth::default());
    let output = generator(&synth, test_config())
        .generate(
            GenerationRequest::from_text(script_of(8)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.format, AudioFormat::Wav);
    assert_eq!(runs(&samples(output.audio.bytes())), (1..=8).collect::<Vec<i16>>());
    // 8 clips of 100 ms and 7 pauses of 300 ms
    assert_eq!(output.duration_ms, 8 * 100 + 7 * 300);
    assert!(output.failed_segments.is_empty());
    assert!(!output.mastered);
    assert_eq!(output.script_hash.len(), 64);
    assert!(output.file_name().starts_with("podcast_"));
    assert!(output.file_name().ends_with(".wav"));
}

#[tokio::test]
async fn best_effort_skips_failed_segment() {
    let synth = Arc::new(ToneSynth {
        fail: HashSet::from([3]),
        ..Default::default()
    });
    let output = generator(&synth, test_config())
        .generate(
            GenerationRequest::from_text(script_of(5)).with_failure_mode(FailureMode::BestEffort),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output.failed_segments, vec![3]);
    assert_eq!(runs(&samples(output.audio.bytes())), vec![1, 2, 3, 5]);
    assert_eq!(output.duration_ms, 4 * 100 + 3 * 300);
    assert!(output.warnings.iter().any(|w| w.contains("segment 3")));
}

#[tokio::test]
async fn strict_mode_aborts_with_failed_index() {
    let synth = Arc::new(ToneSynth {
        fail: HashSet::from([3]),
        ..Default::default()
    });
    let err = generator(&synth, test_config())
        .generate(
            GenerationRequest::from_text(script_of(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "synthesis_failure");
    assert_eq!(err.segment_indices(), &[3]);
}

#[tokio::test]
async fn parse_error_makes_no_synthesis_calls() {
    let synth = Arc::new(ToneSynth::default());
    let text = "[HOST|calm] Welcome.\n\nHOST|excited] no leading bracket\n[GUEST|calm] Hi.";
    let err = generator(&synth, test_config())
        .generate(GenerationRequest::from_text(text), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PodcastError::Parse(parse) => {
            assert_eq!(parse.line, 3);
            assert_eq!(parse.kind, ParseErrorKind::MissingTag);
            assert_eq!(parse.content, "HOST|excited] no leading bracket");
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_script_is_a_validation_error() {
    let synth = Arc::new(ToneSynth::default());
    let err = generator(&synth, test_config())
        .generate(
            GenerationRequest::from_text("\n   \n"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_error");
    assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_discards_partial_output() {
    let synth = Arc::new(ToneSynth {
        delay: Some(Duration::from_millis(500)),
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = generator(&synth, test_config())
        .generate(GenerationRequest::from_text(script_of(6)), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PodcastError::Cancelled));
}

#[tokio::test]
async fn split_continuations_get_no_pause() {
    let synth = Arc::new(ToneSynth::default());
    let mut config = test_config();
    config.pipeline.max_segment_words = 5;
    let text = "[HOST|calm] one two three four five six seven eight nine ten\n[GUEST|calm] hi";

    let output = generator(&synth, config)
        .generate(GenerationRequest::from_text(text), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.segments, 3);
    // pause only at the speaker change
    assert_eq!(output.duration_ms, 3 * 100 + 300);
}

#[tokio::test]
async fn overrides_and_prosody_reach_the_provider() {
    let synth = Arc::new(ToneSynth::default());
    let text = "[HOST|excited] Big news!\n[Caller|whisper] psst\n[GUEST|nonsense] ok";
    generator(&synth, test_config())
        .generate(
            GenerationRequest::from_text(text).with_voice("Caller", "en-GB-RyanNeural"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut requests = synth.requests.lock().unwrap().clone();
    requests.sort_by_key(|r| r.index);
    assert_eq!(requests[0].voice_id, "en-US-JennyNeural");
    assert!(requests[0].prosody.rate > 0);
    assert_eq!(requests[1].voice_id, "en-GB-RyanNeural");
    assert!(requests[1].prosody.volume < 0);
    assert_eq!(requests[2].voice_id, "en-US-GuyNeural");
    assert!(requests[2].prosody.is_neutral());
}

#[tokio::test]
async fn mastering_produces_stereo_output() {
    let synth = Arc::new(ToneSynth::default());
    let mut config = test_config();
    config.pipeline.mastering = true;

    let output = generator(&synth, config)
        .generate(
            GenerationRequest::from_text(script_of(2)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(output.mastered);
    assert!(output.warnings.is_empty());
    let reader = hound::WavReader::new(Cursor::new(output.audio.bytes())).unwrap();
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(output.duration_ms, 2 * 100 + 300);
}

#[tokio::test]
async fn request_can_disable_mastering() {
    let synth = Arc::new(ToneSynth::default());
    let mut config = test_config();
    config.pipeline.mastering = true;

    let output = generator(&synth, config)
        .generate(
            GenerationRequest::from_text(script_of(2)).with_mastering(false),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!output.mastered);
    assert_eq!(runs(&samples(output.audio.bytes())), vec![1, 2]);
}

#[tokio::test]
async fn events_report_progress() {
    let synth = Arc::new(ToneSynth::default());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    generator(&synth, test_config())
        .with_callback(Box::new(move |event| sink.lock().unwrap().push(event)))
        .generate(
            GenerationRequest::from_text(script_of(3)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(GenerationEvent::ScriptParsed { segments: 3, .. })));
    let synthesized = events
        .iter()
        .filter(|e| matches!(e, GenerationEvent::SegmentSynthesized { .. }))
        .count();
    assert_eq!(synthesized, 3);
    assert!(matches!(events.last(), Some(GenerationEvent::Finished { .. })));
}

#[tokio::test]
async fn topic_request_without_generator_is_a_config_error() {
    let synth = Arc::new(ToneSynth::default());
    let request =
        GenerationRequest::from_topic(podcastgen_core::ScriptRequirements::new("bees"));
    let err = generator(&synth, test_config())
        .generate(request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "config_error");
}

#[tokio::test]
async fn topic_request_uses_template_generator() {
    let synth = Arc::new(ToneSynth::default());
    let request =
        GenerationRequest::from_topic(podcastgen_core::ScriptRequirements::new("bees"));
    let output = generator(&synth, test_config())
        .with_script_generator(Arc::new(podcastgen_core::script_gen::TemplateScriptGenerator))
        .generate(request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(output.segments, 14);
    assert!(output.script.segments()[0].text.contains("bees"));
}

#[tokio::test]
async fn same_speaker_lines_share_one_turn() {
    let synth = Arc::new(ToneSynth::default());
    let output = generator(&synth, test_config())
        .generate(
            GenerationRequest::from_text("[HOST|calm] One.\n[HOST|calm] Two.\n[GUEST|calm] Three."),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    // one pause, at the change to GUEST
    assert_eq!(output.duration_ms, 3 * 100 + 300);
    assert_eq!(runs(&samples(output.audio.bytes())), vec![1, 2, 3]);
}

#[tokio::test]
async fn mastering_failure_returns_unmastered_audio() {
    let synth: Arc<dyn SpeechSynthesizer> = Arc::new(FixedSynth {
        format: AudioFormat::Wav,
        payload: nan_wav(),
    });
    let mut config = test_config();
    config.pipeline.mastering = true;
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let output = PodcastGenerator::new(config, synth)
        .with_callback(Box::new(move |event| sink.lock().unwrap().push(event)))
        .generate(
            GenerationRequest::from_text(script_of(2)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!output.mastered);
    assert!(output.warnings.iter().any(|w| w.starts_with("mastering skipped")));
    assert_eq!(output.duration_ms, 2 * 100 + 300);

    // still the assembled float stream, not a re-encoded one
    let reader = hound::WavReader::new(Cursor::new(output.audio.bytes())).unwrap();
    assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
    assert_eq!(reader.spec().channels, 1);

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, GenerationEvent::MasteringFailed { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, GenerationEvent::Mastered { .. })));
}

#[tokio::test]
async fn mp3_episode_decodes_end_to_end() {
    let payload = mp3_tone();
    let synth: Arc<dyn SpeechSynthesizer> = Arc::new(FixedSynth {
        format: AudioFormat::Mp3,
        payload,
    });

    let assembled = PodcastGenerator::new(test_config(), Arc::clone(&synth))
        .generate(
            GenerationRequest::from_text(script_of(3)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(assembled.format, AudioFormat::Mp3);
    assert!(!assembled.mastered);

    let pcm = codec::decode(&assembled.audio).unwrap();
    assert_eq!(pcm.sample_rate, 44_100);
    let decoded_ms = (pcm.samples.len() / usize::from(pcm.channels)) as u64 * 1000 / 44_100;
    // three 300 ms clips and two pauses, plus encoder padding
    assert!(assembled.duration_ms >= 3 * 300 + 2 * 300);
    assert!(decoded_ms >= 3 * 300);
    assert!(decoded_ms <= assembled.duration_ms + 60);

    let mut config = test_config();
    config.pipeline.mastering = true;
    let mastered = PodcastGenerator::new(config, synth)
        .generate(
            GenerationRequest::from_text(script_of(3)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(mastered.mastered);
    assert!(mastered.warnings.is_empty());
    assert_eq!(mastered.format, AudioFormat::Mp3);

    let pcm = codec::decode(&mastered.audio).unwrap();
    assert_eq!(pcm.channels, 2);
    assert_eq!(pcm.sample_rate, 44_100);
    assert!(mastered.duration_ms.abs_diff(assembled.duration_ms) <= 200);
}
