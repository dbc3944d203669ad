//! Phonemisation through the `libespeak-ng` C library.
//!
//! espeak-ng keeps global state and is not thread-safe, so every call is
//! serialised behind one lock.  The library is initialised on first use and
//! the active voice is switched only when a different language is requested.
//!
//! Linking is handled by `build.rs` when the `espeak` feature is enabled.

use std::{
    ffi::{CStr, CString},
    os::raw::{c_char, c_int, c_void},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::language::Language;

extern "C" {
    fn espeak_ng_InitializePath(path: *const c_char);
    fn espeak_ng_Initialize(context: *mut c_void) -> c_int;
    fn espeak_ng_SetVoiceByName(name: *const c_char) -> c_int;

    /// Advances `textptr` one clause per call and sets it to NULL once the
    /// whole input has been consumed.  The returned buffer is overwritten by
    /// the next call.
    fn espeak_TextToPhonemes(
        textptr: *mut *const c_void,
        textmode: c_int,
        phonememode: c_int,
    ) -> *const c_char;
}

const CHARS_UTF8: c_int = 1;
const PHONEMES_IPA: c_int = 0x02;

/// Library state; `None` until initialised, then the selected voice.
struct Engine {
    init: Option<std::result::Result<(), String>>,
    voice: Option<Language>,
}

static ENGINE: Mutex<Engine> = parking_lot::const_mutex(Engine { init: None, voice: None });

static DATA_PATH: OnceCell<PathBuf> = OnceCell::new();

/// Point espeak-ng at a bundled `espeak-ng-data/` directory.
///
/// Only effective before the first call to [`phonemize`]; without it the
/// library's compiled-in system path is used.
pub fn set_data_path(path: &Path) {
    let _ = DATA_PATH.set(path.to_path_buf());
}

fn initialise() -> std::result::Result<(), String> {
    let path = DATA_PATH
        .get()
        .map(|p| CString::new(p.to_string_lossy().as_bytes()))
        .transpose()
        .map_err(|_| "espeak data path contains a null byte".to_string())?;
    let path_ptr = path.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());

    // SAFETY: both calls happen once, under ENGINE's lock, with a valid or
    // null path pointer that outlives the call.
    let status = unsafe {
        espeak_ng_InitializePath(path_ptr);
        espeak_ng_Initialize(std::ptr::null_mut())
    };
    if status != 0 {
        return Err(format!("espeak_ng_Initialize failed (status {:#010x})", status));
    }
    Ok(())
}

fn select_voice(engine: &mut Engine, language: Language) -> Result<()> {
    if engine.voice == Some(language) {
        return Ok(());
    }
    let name = CString::new(language.espeak_voice()).map_err(|e| anyhow!(e))?;
    // SAFETY: `name` is a valid C string for the duration of the call.
    let rc = unsafe { espeak_ng_SetVoiceByName(name.as_ptr()) };
    if rc != 0 {
        engine.voice = None;
        return Err(anyhow!("espeak-ng has no voice '{}' (rc {})", language.espeak_voice(), rc));
    }
    engine.voice = Some(language);
    Ok(())
}

/// Convert `text` to IPA using the espeak-ng voice for `language`.
pub fn phonemize(text: &str, language: Language) -> Result<String> {
    let mut engine = ENGINE.lock();
    engine
        .init
        .get_or_insert_with(initialise)
        .clone()
        .map_err(|e| anyhow!("espeak-ng: {}", e))?;
    select_voice(&mut engine, language)?;

    let text_c = CString::new(text).map_err(|_| anyhow!("phonemize: text contains a null byte"))?;
    let mut cursor: *const c_void = text_c.as_ptr() as *const c_void;
    let mut clauses: Vec<String> = Vec::new();

    while !cursor.is_null() {
        // SAFETY: `cursor` points into `text_c`, which outlives the loop, and
        // the library lock is held.
        let ptr = unsafe { espeak_TextToPhonemes(&mut cursor, CHARS_UTF8, PHONEMES_IPA) };
        if ptr.is_null() {
            continue;
        }
        // SAFETY: non-null result is a NUL-terminated buffer owned by espeak.
        let clause = unsafe { CStr::from_ptr(ptr) }
            .to_str()
            .map_err(|_| anyhow!("espeak-ng returned non-UTF-8 phonemes"))?
            .trim();
        if !clause.is_empty() {
            clauses.push(clause.to_owned());
        }
    }

    Ok(clauses.join(" "))
}
