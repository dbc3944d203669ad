//! Scripted synthesis backend shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use torchts::{
    backend::{BackendSet, BufferStream},
    BackendLoader, Device, GenerationConfig, Generator, Language, ManagerConfig, ModelManager,
    SessionTracker, SynthesisBackend,
};

/// Called with the running buffer count just before each buffer is yielded.
pub type Hook = Arc<dyn Fn(usize) + Send + Sync>;

/// Sample level emitted for a language: American English is louder so the
/// order of multi-speaker audio can be read back from the WAV.
pub fn level_for(language: Language) -> f32 {
    if language == Language::AmericanEnglish {
        0.5
    } else {
        0.25
    }
}

struct FakeBackend {
    level: f32,
    buffers: usize,
    samples: usize,
    texts: Arc<Mutex<Vec<String>>>,
    produced: Arc<AtomicUsize>,
    hook: Option<Hook>,
}

impl SynthesisBackend for FakeBackend {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        _voice: &'a str,
        _speed: f32,
    ) -> anyhow::Result<BufferStream<'a>> {
        if text.contains("explode") {
            anyhow::bail!("vocoder exploded on {:?}", text);
        }
        self.texts.lock().push(text.to_string());
        Ok(Box::new((0..self.buffers).map(move |_| {
            let n = self.produced.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(hook) = &self.hook {
                hook(n);
            }
            Ok(vec![self.level; self.samples])
        })))
    }
}

pub struct FakeLoader {
    pub loads: AtomicUsize,
    pub texts: Arc<Mutex<Vec<String>>>,
    pub produced: Arc<AtomicUsize>,
    pub buffers_per_chunk: usize,
    pub samples_per_buffer: usize,
    pub hook: Option<Hook>,
    pub fail: bool,
}

impl FakeLoader {
    pub fn new(buffers_per_chunk: usize, samples_per_buffer: usize) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            texts: Arc::default(),
            produced: Arc::default(),
            buffers_per_chunk,
            samples_per_buffer,
            hook: None,
            fail: false,
        }
    }

    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

impl BackendLoader for FakeLoader {
    fn load(&self, _device: Device) -> anyhow::Result<BackendSet> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("no weights at /models/missing.onnx");
        }
        let mut set: BackendSet = HashMap::new();
        for language in Language::ALL {
            set.insert(
                language,
                Arc::new(FakeBackend {
                    level: level_for(language),
                    buffers: self.buffers_per_chunk,
                    samples: self.samples_per_buffer,
                    texts: Arc::clone(&self.texts),
                    produced: Arc::clone(&self.produced),
                    hook: self.hook.clone(),
                }),
            );
        }
        Ok(set)
    }
}

pub struct Harness {
    pub generator: Arc<Generator>,
    pub sessions: Arc<SessionTracker>,
    pub models: Arc<ModelManager>,
    pub loader: Arc<FakeLoader>,
}

impl Harness {
    pub fn new(loader: FakeLoader, max_chunk_chars: usize) -> Self {
        Self::with_sessions(loader, max_chunk_chars, Arc::new(SessionTracker::new()))
    }

    /// For hooks that need the tracker before the generator exists.
    pub fn with_sessions(
        loader: FakeLoader,
        max_chunk_chars: usize,
        sessions: Arc<SessionTracker>,
    ) -> Self {
        let loader = Arc::new(loader);
        let models = Arc::new(ModelManager::new(
            Arc::clone(&loader) as Arc<dyn BackendLoader>,
            ManagerConfig::default(),
        ));
        let config = GenerationConfig { max_chunk_chars, ..Default::default() };
        let generator =
            Arc::new(Generator::new(Arc::clone(&models), Arc::clone(&sessions), config));
        Self { generator, sessions, models, loader }
    }
}

/// Decode a 16-bit mono WAV produced by the generator.
pub fn decode_wav(bytes: &[u8]) -> Vec<i16> {
    let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 24_000);
    assert_eq!(spec.bits_per_sample, 16);
    reader.samples::<i16>().map(Result::unwrap).collect()
}
