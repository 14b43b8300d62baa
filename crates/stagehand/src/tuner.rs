//! Tuner math: frequency to nearest note plus cent offset.
//!
//! Equal temperament around A4 = 440 Hz. The monitored tuner output feeds
//! raw frequencies; the surface wants `(freq, note name, cents)`.

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Nearest note and signed cent offset for a frequency. `None` for
/// frequencies without a representable note (<= 0 or absurdly far out).
pub fn freq_to_note_cents(freq: f32) -> Option<(String, i32)> {
    if freq <= 0.0 {
        return None;
    }

    // semitones above/below A4 (MIDI 69)
    let semitones = 12.0 * (freq / 440.0).log2();
    let midi = 69.0 + semitones;
    let nearest = midi.round();

    if !(0.0..=127.0).contains(&nearest) {
        return None;
    }

    let cents = ((midi - nearest) * 100.0).round() as i32;
    let nearest = nearest as i32;
    let name = NOTE_NAMES[(nearest % 12) as usize];
    let octave = nearest / 12 - 1;

    Some((format!("{}{}", name, octave), cents))
}
