//! Note names, MIDI numbers and frequencies.

/// Parse a note name (e.g. "C4", "F#3", "Bb5") into a MIDI note number.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let bytes = note.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let base_semitone = match bytes[0] as char {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut idx = 1;
    let mut semitone = base_semitone;

    if idx < bytes.len() {
        match bytes[idx] as char {
            '#' => {
                semitone += 1;
                idx += 1;
            }
            'b' => {
                semitone -= 1;
                idx += 1;
            }
            _ => {}
        }
    }

    let octave: i32 = note[idx..].parse().ok()?;

    // MIDI note number: C4 = 60
    Some((octave + 1) * 12 + semitone)
}

/// Convert a MIDI note number to frequency using the given tuning pitch.
///
/// `tuning_pitch` is the frequency of A4 (MIDI 69).
/// Formula: `tuning_pitch * 2^((midi - 69) / 12)`
pub fn midi_to_frequency(midi: i32, tuning_pitch: f64) -> f64 {
    tuning_pitch * (2.0_f64).powf((midi as f64 - 69.0) / 12.0)
}

/// Note-to-frequency conversion at A4 = 440 Hz.
pub fn note_to_frequency(note: &str) -> Option<f64> {
    note_to_frequency_with_tuning(note, 440.0)
}

/// Note-to-frequency conversion with configurable tuning pitch.
pub fn note_to_frequency_with_tuning(note: &str, tuning_pitch: f64) -> Option<f64> {
    let midi = note_to_midi(note)?;
    Some(midi_to_frequency(midi, tuning_pitch))
}

/// Convert a frequency to the nearest MIDI note + fine-tune cents.
pub fn frequency_to_midi_cents(freq: f64, a4_freq: f64) -> (u8, f64) {
    if freq <= 0.0 || !freq.is_finite() {
        return (0, 0.0);
    }
    let midi_float = 69.0 + 12.0 * (freq / a4_freq).log2();
    let midi_note = midi_float.round() as i32;
    let cents = (midi_float - midi_note as f64) * 100.0;

    (midi_note.clamp(0, 127) as u8, cents)
}
