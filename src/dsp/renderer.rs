//! WAV renderer: offline note rendering and 16-bit PCM encoding.

use std::io::Cursor;

use crate::config::EngineConfig;
use crate::dsp::engine::{QUANTUM_FRAMES, RenderGraph};
use crate::dsp::schedule::RELEASE_GRACE_SECONDS;
use crate::dsp::voice::{NoteVoice, note_key};
use crate::engine::command::{Command, channels};
use crate::error::{EngineError, Result};
use crate::timbre::TimbreConfig;

/// Encode interleaved f32 samples as a 16-bit PCM WAV byte buffer.
pub fn encode_wav(interleaved: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::with_capacity(44 + interleaved.len() * 2);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
        for &s in interleaved {
            let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer.write_sample(pcm)?;
        }
        writer.finalize()?;
    }
    Ok(bytes)
}

/// Render one note: held for `hold_seconds`, then released until silent.
///
/// Runs a private render graph, so it needs no initialised engine.
/// Returns the left and right channels.
pub fn render_note(
    config: &TimbreConfig,
    frequency: f64,
    velocity: f64,
    hold_seconds: f64,
    sample_rate: u32,
) -> Result<(Vec<f32>, Vec<f32>)> {
    config.validate()?;
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(EngineError::InvalidConfig(format!(
            "frequency must be > 0, got {frequency}"
        )));
    }
    if !hold_seconds.is_finite() || hold_seconds < 0.0 {
        return Err(EngineError::InvalidConfig(format!(
            "hold must be >= 0 seconds, got {hold_seconds}"
        )));
    }

    let sr = sample_rate as f64;
    let engine_config = EngineConfig::default();
    let (graph_channels, mut control) = channels(&engine_config, sr);
    let mut graph = RenderGraph::new(&engine_config, sr, graph_channels);
    control.status.set_running(true);

    let voice = NoteVoice::new(1, config, frequency, velocity.clamp(0.0, 1.0), sr);
    let release = voice.release_seconds();
    let _ = control.commands.push(Command::NoteOn(Box::new(voice)));

    let hold_frames = (hold_seconds * sr).round() as usize;
    let tail_frames = ((release + RELEASE_GRACE_SECONDS) * sr).ceil() as usize + QUANTUM_FRAMES;
    let mut left = vec![0.0f32; hold_frames + tail_frames];
    let mut right = vec![0.0f32; hold_frames + tail_frames];

    let (held_l, tail_l) = left.split_at_mut(hold_frames);
    let (held_r, tail_r) = right.split_at_mut(hold_frames);
    graph.process(held_l, held_r, &[]);
    let _ = control.commands.push(Command::NoteOff {
        key: note_key(frequency),
    });
    graph.process(tail_l, tail_r, &[]);

    graph.shutdown();
    control.collect_garbage();
    Ok((left, right))
}

/// [`render_note`] encoded as a stereo WAV.
pub fn render_note_wav(
    config: &TimbreConfig,
    frequency: f64,
    velocity: f64,
    hold_seconds: f64,
    sample_rate: u32,
) -> Result<Vec<u8>> {
    let (left, right) = render_note(config, frequency, velocity, hold_seconds, sample_rate)?;
    let interleaved: Vec<f32> = left.iter().zip(&right).flat_map(|(l, r)| [*l, *r]).collect();
    encode_wav(&interleaved, sample_rate, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::envelope::Adsr;
    use crate::dsp::oscillator::Waveform;

    #[test]
    fn wav_header_valid() {
        let wav = encode_wav(&[0.0, 0.5, -0.5, 1.0], 44100, 2).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 44100);
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(ch, 2);

        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_size, 8);
        assert_eq!(wav.len(), 44 + 8);
        assert_eq!(i16::from_le_bytes([wav[50], wav[51]]), i16::MAX);
    }

    #[test]
    fn encoded_samples_round_trip_through_hound() {
        let samples: Vec<f32> = (0..200).map(|i| (i as f32 / 100.0) - 1.0).collect();
        let wav = encode_wav(&samples, 22050, 1).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), 200);
        assert_eq!(decoded[0], -i16::MAX);
        assert_eq!(decoded[100], 0);
    }

    #[test]
    fn note_render_has_sound_then_silence() {
        let config = TimbreConfig {
            waveform: Waveform::Sawtooth,
            envelope: Adsr::new(0.01, 0.1, 0.7, 0.2),
            ..TimbreConfig::default()
        };
        let (left, right) = render_note(&config, 440.0, 1.0, 0.3, 22050).unwrap();
        let hold = (0.3f64 * 22050.0).round() as usize;
        assert!(left[..hold].iter().any(|s| s.abs() > 0.05));
        assert_eq!(left, right);
        // silent once the release has run out
        let release_end = hold + (0.2f64 * 22050.0).round() as usize + 1;
        assert!(left[release_end..].iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn note_wav_and_bad_input() {
        let wav = render_note_wav(&TimbreConfig::default(), 261.63, 0.8, 0.1, 22050).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        let has_sound = wav[44..]
            .chunks_exact(2)
            .any(|b| i16::from_le_bytes([b[0], b[1]]) != 0);
        assert!(has_sound, "Rendered WAV should contain non-silent audio");

        assert!(render_note_wav(&TimbreConfig::default(), 0.0, 1.0, 0.1, 22050).is_err());
        assert!(render_note_wav(&TimbreConfig::default(), 440.0, 1.0, -1.0, 22050).is_err());
    }
}
