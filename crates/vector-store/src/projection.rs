use crate::error::{Result, VectorStoreError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Random-projection matrix mapping full embedding vectors to compact
/// binary codes. Generated once at collection creation from a fixed seed;
/// never regenerated for an existing collection.
#[derive(Debug, Clone)]
pub struct ProjectionMatrix {
    rows: usize,
    bits: usize,
    seed: u64,
    data: Array2<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedMatrix {
    rows: usize,
    bits: usize,
    seed: u64,
    data: Vec<Vec<f32>>,
}

impl ProjectionMatrix {
    /// Generate a deterministic `rows × bits` matrix. The same
    /// (rows, bits, seed) triple always yields the same matrix.
    pub fn generate(rows: usize, bits: usize, seed: u64) -> Result<Self> {
        if rows == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "projection rows must be positive".to_string(),
            ));
        }
        if bits == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "projection bits must be positive".to_string(),
            ));
        }

        let mut state = seed
            ^ (rows as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (bits as u64).rotate_left(32);
        let mut data = Array2::zeros((rows, bits));
        for row in 0..rows {
            for col in 0..bits {
                data[[row, col]] = unit_interval(splitmix64(&mut state));
            }
        }

        Ok(Self {
            rows,
            bits,
            seed,
            data,
        })
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn bits(&self) -> usize {
        self.bits
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Width of a packed code in bytes.
    #[must_use]
    pub const fn code_width(&self) -> usize {
        (self.bits + 7) / 8
    }

    /// Project a vector to its packed sign code: bit j is set when
    /// `v · M[:, j] >= 0`, packed MSB-first.
    pub fn project(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.rows {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.rows,
                actual: vector.len(),
            });
        }

        let mut code = vec![0u8; self.code_width()];
        for col in 0..self.bits {
            let mut dot = 0.0f32;
            for (row, value) in vector.iter().enumerate() {
                dot += value * self.data[[row, col]];
            }
            if dot >= 0.0 {
                code[col / 8] |= 1 << (7 - (col % 8));
            }
        }
        Ok(code)
    }

    /// Persist in a human-readable YAML form so matrices survive tool
    /// versions.
    pub fn save(&self, path: &Path) -> Result<()> {
        let persisted = PersistedMatrix {
            rows: self.rows,
            bits: self.bits,
            seed: self.seed,
            data: self
                .data
                .rows()
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
        };
        let rendered = serde_yaml::to_string(&persisted)?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VectorStoreError::MatrixMissing(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let persisted: PersistedMatrix = serde_yaml::from_str(&raw)?;

        if persisted.data.len() != persisted.rows
            || persisted.data.iter().any(|row| row.len() != persisted.bits)
        {
            return Err(VectorStoreError::CorruptArtifact {
                path: path.display().to_string(),
                detail: format!(
                    "matrix shape does not match declared {}x{}",
                    persisted.rows, persisted.bits
                ),
            });
        }

        let mut data = Array2::zeros((persisted.rows, persisted.bits));
        for (r, row) in persisted.data.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                data[[r, c]] = *value;
            }
        }

        Ok(Self {
            rows: persisted.rows,
            bits: persisted.bits,
            seed: persisted.seed,
            data,
        })
    }
}

/// Hamming distance between two equal-width codes.
#[must_use]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn unit_interval(raw: u64) -> f32 {
    // Map to [-1, 1).
    #[allow(clippy::cast_precision_loss)]
    let unit = (raw >> 11) as f32 / (1u64 << 53) as f32;
    unit * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn generation_is_deterministic() {
        let a = ProjectionMatrix::generate(16, 64, 42).unwrap();
        let b = ProjectionMatrix::generate(16, 64, 42).unwrap();
        let v: Vec<f32> = (0..16).map(|i| (i as f32).sin()).collect();
        assert_eq!(a.project(&v).unwrap(), b.project(&v).unwrap());
    }

    #[test]
    fn different_seeds_differ() {
        let a = ProjectionMatrix::generate(16, 64, 1).unwrap();
        let b = ProjectionMatrix::generate(16, 64, 2).unwrap();
        let v: Vec<f32> = (0..16).map(|i| (i as f32).cos()).collect();
        assert_ne!(a.project(&v).unwrap(), b.project(&v).unwrap());
    }

    #[test]
    fn code_width_rounds_up() {
        let m = ProjectionMatrix::generate(8, 12, 0).unwrap();
        assert_eq!(m.code_width(), 2);
        let m = ProjectionMatrix::generate(8, 64, 0).unwrap();
        assert_eq!(m.code_width(), 8);
    }

    #[test]
    fn projection_rejects_wrong_dimension() {
        let m = ProjectionMatrix::generate(8, 16, 0).unwrap();
        let err = m.project(&[1.0; 4]).unwrap_err();
        assert!(matches!(err, VectorStoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn zero_dimensions_rejected() {
        assert!(ProjectionMatrix::generate(0, 8, 0).is_err());
        assert!(ProjectionMatrix::generate(8, 0, 0).is_err());
    }

    #[test]
    fn yaml_round_trip_preserves_projection() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("projection_matrix.yaml");
        let m = ProjectionMatrix::generate(12, 32, 7).unwrap();
        m.save(&path).unwrap();

        let loaded = ProjectionMatrix::load(&path).unwrap();
        assert_eq!(loaded.rows(), 12);
        assert_eq!(loaded.bits(), 32);
        assert_eq!(loaded.seed(), 7);

        let v: Vec<f32> = (0..12).map(|i| (i as f32) * 0.1 - 0.5).collect();
        assert_eq!(m.project(&v).unwrap(), loaded.project(&v).unwrap());
    }

    #[test]
    fn missing_matrix_is_a_hard_error() {
        let tmp = TempDir::new().unwrap();
        let err = ProjectionMatrix::load(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, VectorStoreError::MatrixMissing(_)));
    }

    #[test]
    fn hamming_counts_differing_bits() {
        assert_eq!(hamming_distance(&[0b1111_0000], &[0b0000_1111]), 8);
        assert_eq!(hamming_distance(&[0xFF, 0x00], &[0xFF, 0x01]), 1);
        assert_eq!(hamming_distance(&[0xAA], &[0xAA]), 0);
    }
}
