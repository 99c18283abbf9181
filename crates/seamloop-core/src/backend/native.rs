//! Native backend — symphonia decode + cpal output.
//!
//! 1. `create` decodes the whole resource with symphonia into interleaved
//!    f32 PCM at the output device's rate and channel count. Decoded PCM is
//!    cached per path, so re-priming a loop does not decode again.
//! 2. Each handle is a voice with its own cursor, volume and speed.
//! 3. One cpal stream renders every started voice. A voice that runs out
//!    inside a callback buffer starts its successor on the very next frame
//!    of the same buffer, so the hand-off is sample-accurate.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{CompletionSink, Handle, HandleId, MediaBackend, Resource};
use crate::error::{LoopError, Result};

/// Slowest speed the renderer will step at; 0 would never reach the end.
const MIN_SPEED: f32 = 0.05;

/// Output format the device stream was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputFormat {
    sample_rate: u32,
    channels: u16,
}

/// Decoded audio, interleaved at the output format.
struct Pcm {
    samples: Vec<f32>,
    channels: usize,
}

impl Pcm {
    fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceState {
    Prepared,
    Started,
    Paused,
    Completed,
}

struct Voice {
    pcm: Arc<Pcm>,
    /// Read position in frames; fractional when speed != 1.
    cursor: f64,
    volume: f32,
    speed: f32,
    state: VoiceState,
    next: Option<HandleId>,
    sink: Option<CompletionSink>,
}

impl Voice {
    fn new(pcm: Arc<Pcm>) -> Self {
        Self {
            pcm,
            cursor: 0.0,
            volume: 1.0,
            speed: 1.0,
            state: VoiceState::Prepared,
            next: None,
            sink: None,
        }
    }
}

struct NativeState {
    voices: Mutex<HashMap<HandleId, Voice>>,
    shutdown: AtomicBool,
}

/// Thread-safe native playback backend.
pub struct NativeBackend {
    state: Arc<NativeState>,
    format: OutputFormat,
    cache: Mutex<HashMap<PathBuf, Arc<Pcm>>>,
    next_id: AtomicU64,
    output: Mutex<Option<thread::JoinHandle<()>>>,
}

impl NativeBackend {
    /// Open the default output device and start its stream.
    ///
    /// The stream lives on a dedicated thread until the backend is dropped.
    pub fn new() -> Result<Self> {
        let state = Arc::new(NativeState {
            voices: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let output_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            if let Err(e) = run_output(&output_state, &ready_tx) {
                log::error!("seamloop: output error: {}", e);
                let _ = ready_tx.send(Err(e));
            }
        });

        let format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(LoopError::Output("output thread exited".into()));
            }
        };
        log::info!(
            "seamloop: output {}Hz, {} channels",
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            state,
            format,
            cache: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            output: Mutex::new(Some(handle)),
        })
    }

    fn load(&self, path: &Path) -> Result<Arc<Pcm>> {
        let mut cache = self.cache.lock();
        if let Some(pcm) = cache.get(path) {
            return Ok(Arc::clone(pcm));
        }
        let pcm = Arc::new(decode_file(path, self.format.sample_rate, self.format.channels)?);
        log::debug!("seamloop: decoded {} ({} frames)", path.display(), pcm.frames());
        cache.insert(path.to_path_buf(), Arc::clone(&pcm));
        Ok(pcm)
    }

    fn with_voice(&self, handle: &Handle, f: impl FnOnce(&mut Voice)) {
        match self.state.voices.lock().get_mut(&handle.id()) {
            Some(voice) => f(voice),
            None => log::warn!("seamloop: unknown handle {}", handle.id()),
        }
    }
}

impl MediaBackend for NativeBackend {
    fn create(&self, resource: &Resource) -> Result<Handle> {
        let pcm = self.load(resource.path())?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.voices.lock().insert(id, Voice::new(pcm));
        Ok(Handle::new(id))
    }

    fn set_volume(&self, handle: &Handle, volume: f32) {
        self.with_voice(handle, |v| v.volume = volume);
    }

    fn set_speed(&self, handle: &Handle, speed: f32) {
        self.with_voice(handle, |v| v.speed = speed);
    }

    fn start(&self, handle: &Handle) {
        self.with_voice(handle, |v| {
            if v.state == VoiceState::Completed {
                v.cursor = 0.0;
            }
            v.state = VoiceState::Started;
        });
    }

    fn pause(&self, handle: &Handle) {
        self.with_voice(handle, |v| {
            if v.state == VoiceState::Started {
                v.state = VoiceState::Paused;
            }
        });
    }

    fn is_playing(&self, handle: &Handle) -> bool {
        self.state
            .voices
            .lock()
            .get(&handle.id())
            .map(|v| v.state == VoiceState::Started)
            .unwrap_or(false)
    }

    fn has_completed(&self, handle: &Handle) -> bool {
        self.state
            .voices
            .lock()
            .get(&handle.id())
            .map(|v| v.state == VoiceState::Completed)
            .unwrap_or(false)
    }

    fn set_next(&self, handle: &Handle, next: &Handle) {
        let next_id = next.id();
        let mut late = false;
        self.with_voice(handle, |v| {
            v.next = Some(next_id);
            late = v.state == VoiceState::Completed;
        });
        if late {
            log::debug!("seamloop: handle {} ended before its successor was queued", handle.id());
            self.start(next);
        }
    }

    fn on_completion(&self, handle: &Handle, sink: CompletionSink) {
        let mut late = None;
        self.with_voice(handle, |v| {
            if v.state == VoiceState::Completed {
                late = Some(sink.clone());
            }
            v.sink = Some(sink);
        });
        if let Some(sink) = late {
            sink.notify(handle.id());
        }
    }

    fn release(&self, handle: Handle) {
        if self.state.voices.lock().remove(&handle.id()).is_none() {
            log::warn!("seamloop: release of unknown handle {}", handle.id());
        }
    }
}

impl Drop for NativeBackend {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.output.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Open the default device, report its format, and keep the stream alive.
fn run_output(
    state: &Arc<NativeState>,
    ready: &mpsc::SyncSender<Result<OutputFormat>>,
) -> Result<()> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(LoopError::NoOutputDevice)?;

    let default_cfg = device
        .default_output_config()
        .map_err(|e| LoopError::Output(e.to_string()))?;
    if default_cfg.sample_format() != cpal::SampleFormat::F32 {
        return Err(LoopError::Output(format!(
            "device does not support f32 output (got {:?})",
            default_cfg.sample_format()
        )));
    }
    let config: cpal::StreamConfig = default_cfg.into();
    let format = OutputFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels.max(1),
    };
    let channels = format.channels as usize;

    let cb_state = Arc::clone(state);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let completed = {
                    let mut voices = cb_state.voices.lock();
                    render(&mut voices, data, channels)
                };
                for (sink, id) in completed {
                    sink.notify(id);
                }
            },
            move |err| {
                log::error!("seamloop: cpal error: {}", err);
            },
            None,
        )
        .map_err(|e| LoopError::Output(e.to_string()))?;

    stream.play().map_err(|e| LoopError::Output(e.to_string()))?;
    let _ = ready.send(Ok(format));

    while !state.shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(25));
    }
    Ok(())
}

/// Mix every started voice into `out`, chaining successors gaplessly.
///
/// Returns the completions to report once the voice lock is released.
fn render(
    voices: &mut HashMap<HandleId, Voice>,
    out: &mut [f32],
    channels: usize,
) -> Vec<(CompletionSink, HandleId)> {
    out.fill(0.0);
    let mut completed = Vec::new();
    if channels == 0 {
        return completed;
    }
    let frames = out.len() / channels;

    let mut work: Vec<(HandleId, usize)> = voices
        .iter()
        .filter(|(_, v)| v.state == VoiceState::Started)
        .map(|(id, _)| (*id, 0))
        .collect();

    while let Some((id, offset)) = work.pop() {
        let Some(voice) = voices.get_mut(&id) else { continue };
        let Some(end) = render_voice(voice, out, offset, frames, channels) else { continue };

        voice.state = VoiceState::Completed;
        voice.cursor = 0.0;
        let next = voice.next;
        if let Some(sink) = voice.sink.clone() {
            completed.push((sink, id));
        }

        if let Some(next_id) = next {
            if let Some(successor) = voices.get_mut(&next_id) {
                if matches!(successor.state, VoiceState::Prepared | VoiceState::Paused) {
                    successor.state = VoiceState::Started;
                    work.push((next_id, end));
                }
            }
        }
    }

    completed
}

/// Render one voice from frame `offset`. Returns the frame where it ended.
fn render_voice(
    voice: &mut Voice,
    out: &mut [f32],
    offset: usize,
    frames: usize,
    channels: usize,
) -> Option<usize> {
    let pcm = Arc::clone(&voice.pcm);
    let total = pcm.frames();
    let gain = voice.volume.clamp(0.0, 1.0);
    let step = voice.speed.max(MIN_SPEED) as f64;

    for f in offset..frames {
        let idx = voice.cursor as usize;
        if idx >= total {
            return Some(f);
        }
        for c in 0..channels {
            out[f * channels + c] += interpolate(&pcm.samples, channels, total, voice.cursor, c) * gain;
        }
        voice.cursor += step;
    }

    if voice.cursor as usize >= total {
        Some(frames)
    } else {
        None
    }
}

/// Channel `c` of interleaved `samples` at fractional frame `pos`.
fn interpolate(samples: &[f32], channels: usize, frames: usize, pos: f64, c: usize) -> f32 {
    let idx = (pos as usize).min(frames - 1);
    let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;
    let s0 = samples[idx * channels + c];
    let s1 = if idx + 1 < frames {
        samples[(idx + 1) * channels + c]
    } else {
        s0
    };
    s0 + (s1 - s0) * frac
}

/// Convert a whole interleaved buffer from `from_rate` to `to_rate`.
///
/// Output frame `i` reads source position `i * from_rate / to_rate`, so the
/// result never drifts however long the loop is.
fn resample(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let frames = samples.len() / channels;
    if from_rate == to_rate || from_rate == 0 || frames == 0 {
        return samples.to_vec();
    }
    let out_frames = (frames as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;

    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let pos = i as f64 * step;
        out.extend((0..channels).map(|c| interpolate(samples, channels, frames, pos, c)));
    }
    out
}

/// Map interleaved frames from `from` channels to `to` channels.
///
/// Mono fans out to every output channel, a mono target gets the average,
/// anything else keeps the channels both layouts share.
fn remix(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        match (from, to) {
            (1, _) => out.extend(std::iter::repeat(frame[0]).take(to)),
            (_, 1) => out.push(frame.iter().sum::<f32>() / from as f32),
            _ => out.extend((0..to).map(|c| frame.get(c).copied().unwrap_or(0.0))),
        }
    }
    out
}

/// Decode a whole file to interleaved f32 at the given rate and channels.
fn decode_file(path: &Path, target_rate: u32, target_channels: u16) -> Result<Pcm> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoopError::ResourceNotFound(path.to_path_buf()),
        _ => LoopError::Io(e),
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(symphonia_err)?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| LoopError::UnsupportedFormat("no default track".into()))?;
    let track_id = track.id;
    let source_rate = track.codec_params.sample_rate.unwrap_or(44100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(symphonia_err)?;

    let mut source_channels: Option<u16> = None;
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(symphonia_err(e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("seamloop: skipping corrupt packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(symphonia_err(e)),
        };
        let spec = *decoded.spec();
        if source_channels.is_none() {
            source_channels = Some(spec.channels.count() as u16);
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());
    }

    let channels = target_channels.max(1) as usize;
    let src_ch = source_channels.unwrap_or(target_channels).max(1) as usize;
    let remixed = remix(&interleaved, src_ch, channels);
    if source_rate != target_rate {
        log::info!("seamloop: resampling {}Hz -> {}Hz", source_rate, target_rate);
    }

    Ok(Pcm {
        samples: resample(&remixed, channels, source_rate, target_rate),
        channels,
    })
}

fn symphonia_err(e: SymphoniaError) -> LoopError {
    match e {
        SymphoniaError::Unsupported(what) => LoopError::UnsupportedFormat(what.to_string()),
        SymphoniaError::IoError(io) => LoopError::Io(io),
        other => LoopError::Decode(other.to_string()),
    }
}
