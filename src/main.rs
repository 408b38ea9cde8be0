//! Petal Synth - headless host for the modular engine
//!
//! Builds a small demo patch (saw oscillator through a lowpass filter into
//! an ADSR envelope), holds a note for half the run and releases it.
//!
//! Environment:
//! - `PETAL_SECONDS`: run length in seconds (default 2)
//! - `PETAL_SAVE`: if set, the demo patch is saved to this JSON file
//! - `PETAL_DEVICE`: output device index (`audio-host` only; default device
//!   otherwise)
//! - `RUST_LOG`: log filter (default `info`)
//!
//! With the `audio-host` feature the patch plays through the default output
//! device; otherwise it is rendered offline and summarized.

use std::error::Error;
use std::path::Path;

use log::info;

use petal_synth::dsp::{ModuleKind, MAX_BLOCK_SIZE, SAMPLE_RATE, SCT_A440, SCT_PER_OCTAVE};
use petal_synth::engine::{AudioProcessor, InstanceHandle, PatchController, PortRef};
use petal_synth::modules::filter::MODE_LOWPASS;
use petal_synth::modules::oscillator::WAVE_SAW;
use petal_synth::modules::{standard_registry, AdsrEnvelope, Filter, Oscillator};
use petal_synth::persistence::save_to_file;

const DEFAULT_SECONDS: f32 = 2.0;

fn run_seconds() -> f32 {
    std::env::var("PETAL_SECONDS")
        .ok()
        .and_then(|s| s.parse::<f32>().ok())
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(DEFAULT_SECONDS)
}

/// Builds the demo patch and returns the envelope to trigger.
fn build_demo(controller: &mut PatchController<'_>) -> Result<InstanceHandle, Box<dyn Error>> {
    let osc = controller.create(Oscillator::INFO.id, 0)?;
    let filter = controller.create(Filter::INFO.id, 0)?;
    let env = controller.create(AdsrEnvelope::INFO.id, 0)?;

    controller.set_value(osc, Oscillator::PITCH, SCT_A440 - SCT_PER_OCTAVE as i16)?;
    controller.set_value(osc, Oscillator::WAVEFORM, WAVE_SAW)?;
    controller.set_value(filter, Filter::CUTOFF, SCT_A440 + SCT_PER_OCTAVE as i16)?;
    controller.set_value(filter, Filter::RESO, 8000)?;
    controller.set_value(filter, Filter::MODE, MODE_LOWPASS)?;
    controller.set_value(env, AdsrEnvelope::ATTACK, 20)?;
    controller.set_value(env, AdsrEnvelope::RELEASE, 300)?;

    controller.connect(osc, Oscillator::OUT, filter, Filter::INPUT)?;
    controller.connect(filter, Filter::OUT, env, AdsrEnvelope::INPUT)?;
    controller.set_root(Some(PortRef::new(env, AdsrEnvelope::OUT.index())))?;

    info!("demo patch built with {} instances", controller.len());
    Ok(env)
}

fn render_offline(
    controller: &mut PatchController<'_>,
    mut processor: AudioProcessor,
    env: InstanceHandle,
    seconds: f32,
) -> Result<(), Box<dyn Error>> {
    let total = (seconds * SAMPLE_RATE as f32) as usize;
    let release_at = total / 2;
    let mut rendered = 0;
    let mut peak = 0i32;
    let mut energy = 0f64;

    controller.trigger_start(env, AdsrEnvelope::TRIGGER, 32767)?;
    while rendered < total {
        if rendered >= release_at && rendered < release_at + MAX_BLOCK_SIZE {
            controller.trigger_stop(env, AdsrEnvelope::TRIGGER)?;
        }
        let frames = MAX_BLOCK_SIZE.min(total - rendered);
        for &sample in processor.render_block(frames) {
            peak = peak.max((sample as i32).abs());
            energy += (sample as f64) * (sample as f64);
        }
        rendered += frames;
        controller.collect_garbage();
    }

    let rms = (energy / total.max(1) as f64).sqrt();
    info!("rendered {rendered} samples offline: peak {peak}, rms {rms:.1}");
    Ok(())
}

#[cfg(feature = "audio-host")]
fn play(
    controller: &mut PatchController<'_>,
    processor: AudioProcessor,
    env: InstanceHandle,
    seconds: f32,
) -> Result<(), Box<dyn Error>> {
    use petal_synth::engine::AudioEngine;
    use std::time::Duration;

    let mut engine = AudioEngine::new()?;
    for device in engine.enumerate_devices() {
        info!(
            "output device {}: {}{}",
            device.index,
            device.name,
            if device.is_default { " (default)" } else { "" }
        );
    }
    if let Some(index) = std::env::var("PETAL_DEVICE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
    {
        engine.select_device(index)?;
    }
    info!("using output device {}", engine.current_device_name());
    engine.start_with_processor(processor)?;

    let half = Duration::from_secs_f32(seconds / 2.0);
    controller.trigger_start(env, AdsrEnvelope::TRIGGER, 32767)?;
    std::thread::sleep(half);
    controller.trigger_stop(env, AdsrEnvelope::TRIGGER)?;
    std::thread::sleep(half);

    controller.collect_garbage();
    engine.stop()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let registry = standard_registry();
    info!("{} module kinds registered", registry.len());
    for module in registry.list_modules() {
        log::debug!("  {} ({}): {}", module.name, module.id, module.description);
    }

    let (mut controller, processor) = PatchController::with_processor(registry);
    let env = build_demo(&mut controller)?;

    if let Ok(path) = std::env::var("PETAL_SAVE") {
        save_to_file(&controller.to_patch("demo"), Path::new(&path))?;
    }

    let seconds = run_seconds();

    #[cfg(feature = "audio-host")]
    play(&mut controller, processor, env, seconds)?;

    #[cfg(not(feature = "audio-host"))]
    render_offline(&mut controller, processor, env, seconds)?;

    Ok(())
}
