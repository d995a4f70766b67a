use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use nalgebra::{Matrix3, Point3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected end of snapshot input")]
    UnexpectedEnd,
    #[error("line {line}: expected {expected} numeric fields")]
    FieldCount { line: usize, expected: usize },
    #[error("line {line}: invalid number")]
    InvalidNumber { line: usize },
    #[error("line {line}: expected a key=value entry")]
    InvalidAux { line: usize },
}

/// Persistable state of one particle: fractional position and orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleState {
    pub position: Point3<f64>,
    pub orientation: Matrix3<f64>,
}

/// Complete persistable state of a packing, plus auxiliary key=value entries
/// contributed by the driver (step sizes, cycle count).
///
/// The persisted layout is newline-delimited ASCII: the particle count, the
/// box matrix (9 numbers, row-major), one line of 12 numbers per particle,
/// then the auxiliary entries. Floats print in Rust's shortest round-trip
/// form, so deserialising and reserialising reproduces the byte sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackingSnapshot {
    pub box_matrix: Matrix3<f64>,
    pub particles: Vec<ParticleState>,
    pub aux: BTreeMap<String, String>,
}

impl PackingSnapshot {
    pub fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "{}", self.particles.len())?;
        writeln!(out, "{}", format_numbers(self.box_matrix.transpose().iter()))?;
        for particle in &self.particles {
            let orientation = particle.orientation.transpose();
            let fields = particle.position.iter().chain(orientation.iter());
            writeln!(out, "{}", format_numbers(fields))?;
        }
        for (key, value) in &self.aux {
            writeln!(out, "{key}={value}")?;
        }
        Ok(())
    }

    pub fn read(input: &mut dyn BufRead) -> Result<Self, SnapshotError> {
        let mut lines = input.lines().enumerate();

        let (line_no, first) = lines.next().ok_or(SnapshotError::UnexpectedEnd)?;
        let count: usize = first?
            .trim()
            .parse()
            .map_err(|_| SnapshotError::InvalidNumber { line: line_no + 1 })?;

        let (line_no, box_line) = lines.next().ok_or(SnapshotError::UnexpectedEnd)?;
        let box_fields = parse_numbers(&box_line?, line_no + 1, 9)?;
        // row-major on disk
        let box_matrix = Matrix3::from_row_slice(&box_fields);

        let mut particles = Vec::with_capacity(count);
        for _ in 0..count {
            let (line_no, particle_line) = lines.next().ok_or(SnapshotError::UnexpectedEnd)?;
            let fields = parse_numbers(&particle_line?, line_no + 1, 12)?;
            particles.push(ParticleState {
                position: Point3::new(fields[0], fields[1], fields[2]),
                orientation: Matrix3::from_row_slice(&fields[3..12]),
            });
        }

        let mut aux = BTreeMap::new();
        for (line_no, aux_line) in lines {
            let aux_line = aux_line?;
            if aux_line.trim().is_empty() {
                continue;
            }
            let (key, value) = aux_line
                .split_once('=')
                .ok_or(SnapshotError::InvalidAux { line: line_no + 1 })?;
            aux.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            box_matrix,
            particles,
            aux,
        })
    }
}

fn format_numbers<'a>(fields: impl Iterator<Item = &'a f64>) -> String {
    let mut out = String::new();
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&field.to_string());
    }
    out
}

fn parse_numbers(line: &str, line_no: usize, expected: usize) -> Result<Vec<f64>, SnapshotError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != expected {
        return Err(SnapshotError::FieldCount {
            line: line_no,
            expected,
        });
    }
    fields
        .iter()
        .map(|f| {
            f.parse()
                .map_err(|_| SnapshotError::InvalidNumber { line: line_no })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn sample_snapshot() -> PackingSnapshot {
        let mut aux = BTreeMap::new();
        aux.insert("translation_step".to_string(), "0.1".to_string());
        aux.insert("cycles".to_string(), "250".to_string());
        PackingSnapshot {
            box_matrix: Matrix3::from_diagonal_element(7.5),
            particles: vec![
                ParticleState {
                    position: Point3::new(0.125, 0.5, 0.7500000000000001),
                    orientation: Matrix3::identity(),
                },
                ParticleState {
                    position: Point3::new(0.1, 0.2, 0.3),
                    orientation: Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
                },
            ],
            aux,
        }
    }

    #[test]
    fn round_trip_preserves_the_snapshot() {
        let snapshot = sample_snapshot();
        let mut buffer = Vec::new();
        snapshot.write(&mut buffer).unwrap();
        let restored = PackingSnapshot::read(&mut BufReader::new(buffer.as_slice())).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn reserialising_reproduces_the_byte_sequence() {
        let snapshot = sample_snapshot();
        let mut first = Vec::new();
        snapshot.write(&mut first).unwrap();
        let restored = PackingSnapshot::read(&mut BufReader::new(first.as_slice())).unwrap();
        let mut second = Vec::new();
        restored.write(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let input = "2\n7.5 0 0 0 7.5 0 0 0 7.5\n0.1 0.2 0.3 1 0 0 0 1 0 0 0 1\n";
        let result = PackingSnapshot::read(&mut BufReader::new(input.as_bytes()));
        assert!(matches!(result, Err(SnapshotError::UnexpectedEnd)));
    }

    #[test]
    fn malformed_fields_are_rejected_with_the_line_number() {
        let input = "1\n7.5 0 0 0 7.5 0 0 0 7.5\n0.1 0.2 zzz 1 0 0 0 1 0 0 0 1\n";
        let result = PackingSnapshot::read(&mut BufReader::new(input.as_bytes()));
        assert!(matches!(result, Err(SnapshotError::InvalidNumber { line: 3 })));
        let input = "1\n7.5 0 0 0 7.5\n";
        let result = PackingSnapshot::read(&mut BufReader::new(input.as_bytes()));
        assert!(matches!(
            result,
            Err(SnapshotError::FieldCount { line: 2, expected: 9 })
        ));
    }

    #[test]
    fn aux_entries_without_equals_are_rejected() {
        let input = "0\n1 0 0 0 1 0 0 0 1\nbogus\n";
        let result = PackingSnapshot::read(&mut BufReader::new(input.as_bytes()));
        assert!(matches!(result, Err(SnapshotError::InvalidAux { line: 3 })));
    }
}
