//! Spoken confirmations with an on-disk synthesis cache.
//!
//! Audio for a `(name, cue)` pair is synthesized once and replayed from the
//! cache directory on later requests, including across restarts. Synthesis
//! and playback always run as background tasks; callers never wait.

use crate::config::Config;
use crate::event::Mode;
use crate::tasks::Spawn;
use presensi_core::IdentityKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("command template is empty")]
    EmptyCommand,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Exit {
        program: String,
        status: std::process::ExitStatus,
    },
    #[error("{program} did not finish within {after:?}")]
    Timeout { program: String, after: Duration },
    #[error("speech cache I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which announcement to play for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    /// Attendance recorded.
    Success(Mode),
    /// Already marked for this mode today.
    Duplicate(Mode),
}

impl Cue {
    fn slug(self) -> String {
        let (mode, kind) = match self {
            Cue::Success(mode) => (mode, "success"),
            Cue::Duplicate(mode) => (mode, "duplicate"),
        };
        format!("{}_{kind}", mode.as_str().to_lowercase())
    }
}

/// Text-to-speech backend writing an audio file.
pub trait SpeechSynth: Send + Sync {
    fn synthesize(&self, text: &str, out: &Path) -> Result<(), SpeechError>;
}

/// Audio playback backend. `play` may block until playback ends; the
/// announcer only ever calls it from a background task.
pub trait AudioPlayer: Send + Sync {
    fn play(&self, file: &Path) -> Result<(), SpeechError>;
}

/// External command with `{placeholder}` substitution per argument.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    argv: Vec<String>,
    timeout: Option<Duration>,
}

const WAIT_POLL: Duration = Duration::from_millis(20);

fn substitute(arg: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let value = tail.find('}').and_then(|close| {
            let key = &tail[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

impl CommandTemplate {
    pub fn new(argv: Vec<String>) -> Result<Self, SpeechError> {
        if argv.is_empty() {
            return Err(SpeechError::EmptyCommand);
        }
        Ok(Self { argv, timeout: None })
    }

    /// Kill the command if it has not exited after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Substituted values are emitted as-is and never rescanned, so a
    /// sentence containing `{out}` reaches the tool verbatim.
    fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.argv.iter().map(|arg| substitute(arg, vars)).collect()
    }

    fn run(&self, vars: &[(&str, &str)]) -> Result<(), SpeechError> {
        let argv = self.render(vars);
        let (program, args) = argv.split_first().ok_or(SpeechError::EmptyCommand)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                program: program.clone(),
                source,
            })?;
        let status = match self.timeout {
            None => child.wait(),
            Some(after) => {
                let deadline = Instant::now() + after;
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => break Ok(status),
                        Ok(None) if Instant::now() >= deadline => {
                            let _ = child.kill();
                            let _ = child.wait();
                            tracing::warn!(program = %program, after_ms = after.as_millis() as u64, "speech command timed out");
                            return Err(SpeechError::Timeout {
                                program: program.clone(),
                                after,
                            });
                        }
                        Ok(None) => std::thread::sleep(WAIT_POLL),
                        Err(e) => break Err(e),
                    }
                }
            }
        }
        .map_err(|source| SpeechError::Spawn {
            program: program.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::Exit {
                program: program.clone(),
                status,
            })
        }
    }
}

/// Synthesis through an external tool (`gtts-cli`, `espeak-ng`, ...).
/// Placeholders: `{text}`, `{lang}`, `{out}`.
pub struct CommandSynth {
    template: CommandTemplate,
    lang: String,
}

impl CommandSynth {
    pub fn new(template: CommandTemplate, lang: impl Into<String>) -> Self {
        Self {
            template,
            lang: lang.into(),
        }
    }
}

impl SpeechSynth for CommandSynth {
    fn synthesize(&self, text: &str, out: &Path) -> Result<(), SpeechError> {
        let out = out.to_string_lossy();
        self.template
            .run(&[("text", text), ("lang", &self.lang), ("out", &out)])
    }
}

/// Playback through an external player (`mpg123`, `aplay`, ...).
/// Placeholder: `{file}`.
pub struct CommandPlayer {
    template: CommandTemplate,
}

impl CommandPlayer {
    pub fn new(template: CommandTemplate) -> Self {
        Self { template }
    }
}

impl AudioPlayer for CommandPlayer {
    fn play(&self, file: &Path) -> Result<(), SpeechError> {
        self.template.run(&[("file", &file.to_string_lossy())])
    }
}

/// What `announce` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announced {
    /// Cached audio handed to the player.
    Cached,
    /// Cache miss; synthesis then playback queued.
    Synthesizing,
    /// Synthesis for this key already in flight; nothing queued.
    Pending,
}

#[derive(Debug, Clone)]
enum Entry {
    Pending,
    Ready(PathBuf),
}

type CacheKey = (IdentityKey, Cue);

pub struct Announcer {
    cache_dir: PathBuf,
    extension: String,
    synth: Arc<dyn SpeechSynth>,
    player: Arc<dyn AudioPlayer>,
    spawner: Arc<dyn Spawn>,
    entries: Arc<Mutex<HashMap<CacheKey, Entry>>>,
}

impl Announcer {
    pub fn new(
        cache_dir: &Path,
        extension: &str,
        synth: Arc<dyn SpeechSynth>,
        player: Arc<dyn AudioPlayer>,
        spawner: Arc<dyn Spawn>,
    ) -> Result<Self, SpeechError> {
        std::fs::create_dir_all(cache_dir).map_err(|source| SpeechError::Io {
            path: cache_dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
            synth,
            player,
            spawner,
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// External-command synthesizer and player as configured.
    pub fn from_config(config: &Config, spawner: Arc<dyn Spawn>) -> Result<Self, SpeechError> {
        let synth = CommandSynth::new(
            CommandTemplate::new(config.synth_command.clone())?.with_timeout(config.speech_timeout()),
            config.speech_lang.clone(),
        );
        let player = CommandPlayer::new(CommandTemplate::new(config.player_command.clone())?);
        Self::new(
            &config.speech_cache_dir,
            &config.speech_format,
            Arc::new(synth),
            Arc::new(player),
            spawner,
        )
    }

    /// Deterministic cache file for a key, stable across runs.
    pub fn cache_path(&self, name: &IdentityKey, cue: Cue) -> PathBuf {
        self.cache_dir
            .join(format!("tts_{}_{}.{}", name.slug(), cue.slug(), self.extension))
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Play the announcement for `(name, cue)`, synthesizing it first if it
    /// is not cached. `text` is only evaluated on a miss.
    pub fn announce(&self, name: &IdentityKey, cue: Cue, text: impl FnOnce() -> String) -> Announced {
        let key = (name.clone(), cue);
        let path = self.cache_path(name, cue);

        {
            let mut entries = self.entries();
            match entries.get(&key) {
                Some(Entry::Ready(ready)) => {
                    let ready = ready.clone();
                    drop(entries);
                    self.play(ready);
                    return Announced::Cached;
                }
                Some(Entry::Pending) => {
                    tracing::debug!(name = %name, ?cue, "speech synthesis already in flight");
                    return Announced::Pending;
                }
                None if path.exists() => {
                    entries.insert(key, Entry::Ready(path.clone()));
                    drop(entries);
                    self.play(path);
                    return Announced::Cached;
                }
                None => {
                    entries.insert(key.clone(), Entry::Pending);
                }
            }
        }

        let text = text();
        let synth = Arc::clone(&self.synth);
        let player = Arc::clone(&self.player);
        let entries = Arc::clone(&self.entries);
        self.spawner.spawn(
            "speech-synth",
            Box::new(move || {
                let staged = path.with_extension("part");
                let result = synth.synthesize(&text, &staged).and_then(|()| {
                    std::fs::rename(&staged, &path).map_err(|source| SpeechError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                });

                let mut map = entries.lock().unwrap_or_else(PoisonError::into_inner);
                match result {
                    Ok(()) => {
                        map.insert(key, Entry::Ready(path.clone()));
                        drop(map);
                        player.play(&path)?;
                        Ok(())
                    }
                    Err(err) => {
                        // Forget the key so the next request retries.
                        map.remove(&key);
                        let _ = std::fs::remove_file(&staged);
                        Err(err.into())
                    }
                }
            }),
        );
        Announced::Synthesizing
    }

    /// Synthesize and play a one-off utterance without touching the cache.
    /// The transient file is removed after playback.
    pub fn speak_once(&self, text: impl Into<String>) {
        let text = text.into();
        let path = std::env::temp_dir().join(format!(
            "presensi_once_{}.{}",
            uuid::Uuid::new_v4().simple(),
            self.extension
        ));
        let synth = Arc::clone(&self.synth);
        let player = Arc::clone(&self.player);
        self.spawner.spawn(
            "speech-once",
            Box::new(move || {
                let result = synth
                    .synthesize(&text, &path)
                    .and_then(|()| player.play(&path));
                let _ = std::fs::remove_file(&path);
                result.map_err(Into::into)
            }),
        );
    }

    fn play(&self, path: PathBuf) {
        let player = Arc::clone(&self.player);
        self.spawner
            .spawn("speech-play", Box::new(move || Ok(player.play(&path)?)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{InlineSpawner, Job};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSynth {
        calls: AtomicUsize,
        fail: bool,
    }

    impl SpeechSynth for FakeSynth {
        fn synthesize(&self, text: &str, out: &Path) -> Result<(), SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SpeechError::EmptyCommand);
            }
            std::fs::write(out, text).map_err(|source| SpeechError::Io {
                path: out.display().to_string(),
                source,
            })
        }
    }

    #[derive(Default)]
    struct FakePlayer {
        played: Mutex<Vec<(PathBuf, bool)>>,
    }

    impl AudioPlayer for FakePlayer {
        fn play(&self, file: &Path) -> Result<(), SpeechError> {
            self.played.lock().unwrap().push((file.to_path_buf(), file.exists()));
            Ok(())
        }
    }

    /// Holds jobs until the test runs them.
    #[derive(Default)]
    struct Deferred {
        jobs: Mutex<Vec<Job>>,
    }

    impl Spawn for Deferred {
        fn spawn(&self, _name: &'static str, job: Job) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    impl Deferred {
        fn run_all(&self) {
            let jobs: Vec<Job> = self.jobs.lock().unwrap().drain(..).collect();
            for job in jobs {
                let _ = job();
            }
        }
    }

    fn announcer(
        dir: &Path,
        synth: Arc<FakeSynth>,
        player: Arc<FakePlayer>,
        spawner: Arc<dyn Spawn>,
    ) -> Announcer {
        Announcer::new(dir, "mp3", synth, player, spawner).unwrap()
    }

    fn alice() -> IdentityKey {
        IdentityKey::new("Alice Smith")
    }

    #[test]
    fn test_cache_path_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = announcer(dir.path(), Default::default(), Default::default(), Arc::new(InlineSpawner));
        assert_eq!(
            a.cache_path(&alice(), Cue::Success(Mode::CheckIn)),
            dir.path().join("tts_alice_smith_check_in_success.mp3")
        );
    }

    #[test]
    fn test_second_announce_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::default());
        let player = Arc::new(FakePlayer::default());
        let a = announcer(dir.path(), Arc::clone(&synth), Arc::clone(&player), Arc::new(InlineSpawner));
        let cue = Cue::Success(Mode::CheckIn);

        assert_eq!(a.announce(&alice(), cue, || "hello".into()), Announced::Synthesizing);
        let second = a.announce(&alice(), cue, || panic!("text must not be built on a hit"));
        assert_eq!(second, Announced::Cached);

        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        let played = player.played.lock().unwrap();
        assert_eq!(played.len(), 2);
        assert!(played.iter().all(|(p, existed)| *p == a.cache_path(&alice(), cue) && *existed));
    }

    #[test]
    fn test_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let cue = Cue::Duplicate(Mode::CheckOut);
        let first_synth = Arc::new(FakeSynth::default());
        announcer(dir.path(), first_synth, Default::default(), Arc::new(InlineSpawner))
            .announce(&alice(), cue, || "again".into());

        let synth = Arc::new(FakeSynth::default());
        let a = announcer(dir.path(), Arc::clone(&synth), Default::default(), Arc::new(InlineSpawner));
        assert_eq!(a.announce(&alice(), cue, || "again".into()), Announced::Cached);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_miss_while_pending_does_not_resynthesize() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::default());
        let player = Arc::new(FakePlayer::default());
        let spawner = Arc::new(Deferred::default());
        let a = announcer(dir.path(), Arc::clone(&synth), Arc::clone(&player), spawner.clone());
        let cue = Cue::Success(Mode::CheckOut);

        assert_eq!(a.announce(&alice(), cue, || "bye".into()), Announced::Synthesizing);
        assert_eq!(a.announce(&alice(), cue, || "bye".into()), Announced::Pending);
        spawner.run_all();

        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(player.played.lock().unwrap().len(), 1);
        assert_eq!(a.announce(&alice(), cue, || "bye".into()), Announced::Cached);
    }

    #[test]
    fn test_failed_synthesis_retries_next_time() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth { fail: true, ..Default::default() });
        let player = Arc::new(FakePlayer::default());
        let a = announcer(dir.path(), Arc::clone(&synth), Arc::clone(&player), Arc::new(InlineSpawner));
        let cue = Cue::Success(Mode::CheckIn);

        a.announce(&alice(), cue, || "hi".into());
        assert_eq!(a.announce(&alice(), cue, || "hi".into()), Announced::Synthesizing);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
        assert!(player.played.lock().unwrap().is_empty());
        assert!(!a.cache_path(&alice(), cue).exists());
    }

    #[test]
    fn test_speak_once_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FakeSynth::default());
        let player = Arc::new(FakePlayer::default());
        let a = announcer(dir.path(), Arc::clone(&synth), Arc::clone(&player), Arc::new(InlineSpawner));

        a.speak_once("testing one two");

        let played = player.played.lock().unwrap();
        assert_eq!(played.len(), 1);
        let (path, existed) = &played[0];
        assert!(*existed, "file must exist while playing");
        assert!(!path.exists(), "transient file is removed after playback");
        assert!(!path.starts_with(dir.path()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_command_template_render() {
        let template = CommandTemplate::new(vec![
            "gtts-cli".into(),
            "--lang".into(),
            "{lang}".into(),
            "--output={out}".into(),
            "{text}".into(),
        ])
        .unwrap();
        let argv = template.render(&[("text", "hi {lang}"), ("lang", "id"), ("out", "/tmp/x.mp3")]);
        assert_eq!(argv[2], "id");
        assert_eq!(argv[3], "--output=/tmp/x.mp3");
        // Substituted values are not re-expanded by later keys.
        assert_eq!(argv[4], "hi {lang}");
        assert!(CommandTemplate::new(vec![]).is_err());
    }

    #[test]
    fn test_command_template_leaves_braces_in_text_alone() {
        let template = CommandTemplate::new(vec!["tts".into(), "{out}".into(), "{text}".into(), "{lang}{lang}".into()]).unwrap();
        let argv = template.render(&[("text", "save to {out} or { {nope}"), ("lang", "id"), ("out", "/tmp/x.mp3")]);
        assert_eq!(argv[1], "/tmp/x.mp3");
        assert_eq!(argv[2], "save to {out} or { {nope}");
        assert_eq!(argv[3], "idid");
    }

    #[cfg(unix)]
    fn hanging_synth() -> CommandSynth {
        let template = CommandTemplate::new(vec!["sleep".into(), "5".into()])
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        CommandSynth::new(template, "en")
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_command_is_killed_after_timeout() {
        let started = Instant::now();
        let err = hanging_synth()
            .synthesize("hello", Path::new("/nonexistent/out.mp3"))
            .unwrap_err();
        assert!(matches!(err, SpeechError::Timeout { ref program, .. } if program == "sleep"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_timed_out_synthesis_clears_pending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let player = Arc::new(FakePlayer::default());
        let spawner = Arc::new(Deferred::default());
        let a = Announcer::new(
            dir.path(),
            "mp3",
            Arc::new(hanging_synth()),
            Arc::clone(&player) as Arc<dyn AudioPlayer>,
            spawner.clone(),
        )
        .unwrap();
        let cue = Cue::Success(Mode::CheckIn);

        assert_eq!(a.announce(&alice(), cue, || "hi".into()), Announced::Synthesizing);
        assert_eq!(a.announce(&alice(), cue, || "hi".into()), Announced::Pending);
        spawner.run_all();

        assert!(player.played.lock().unwrap().is_empty());
        assert!(!a.cache_path(&alice(), cue).exists());
        assert_eq!(a.announce(&alice(), cue, || "hi".into()), Announced::Synthesizing);
    }

    #[test]
    fn test_similar_names_get_distinct_cache_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = announcer(dir.path(), Default::default(), Default::default(), Arc::new(InlineSpawner));
        let cue = Cue::Success(Mode::CheckIn);
        assert_ne!(
            a.cache_path(&IdentityKey::new("Ana-Maria"), cue),
            a.cache_path(&IdentityKey::new("Ana Maria"), cue)
        );
    }
}
