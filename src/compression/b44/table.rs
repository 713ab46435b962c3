//! Lookup tables used to flatten the quantization curve for channels that are not
//! flagged `quantize_linearly` (typically chroma channels stored in a log-like
//! encoding). `exp_table()` undoes the log encoding before quantizing to 16 bits;
//! `log_table()` re-applies it when unpacking. Built lazily from `half`'s own
//! conversions rather than shipped as two 128 KiB literals.

use half::f16;
use std::sync::OnceLock;

const TABLE_SIZE: usize = 1 << 16;

fn build_exp_table() -> Box<[u16; TABLE_SIZE]> {
    let mut table = Box::new([0_u16; TABLE_SIZE]);

    for (bits, slot) in table.iter_mut().enumerate() {
        let value = f16::from_bits(bits as u16);
        *slot = if value.is_finite() {
            f16::from_f64(value.to_f64().exp2()).to_bits()
        } else {
            0
        };
    }

    table
}

fn build_log_table() -> Box<[u16; TABLE_SIZE]> {
    let mut table = Box::new([0_u16; TABLE_SIZE]);

    for (bits, slot) in table.iter_mut().enumerate() {
        let value = f16::from_bits(bits as u16);
        *slot = if value.is_finite() && value.to_f64() > 0.0 {
            f16::from_f64(value.to_f64().log2()).to_bits()
        } else {
            0
        };
    }

    table
}

pub fn exp_table() -> &'static [u16; TABLE_SIZE] {
    static TABLE: OnceLock<Box<[u16; TABLE_SIZE]>> = OnceLock::new();
    TABLE.get_or_init(build_exp_table)
}

pub fn log_table() -> &'static [u16; TABLE_SIZE] {
    static TABLE: OnceLock<Box<[u16; TABLE_SIZE]>> = OnceLock::new();
    TABLE.get_or_init(build_log_table)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tables_round_trip_small_positive_values() {
        let exp = exp_table();
        let log = log_table();

        let one = f16::from_f32(1.0).to_bits();
        let after_exp = f16::from_bits(exp[one as usize]);
        assert!((after_exp.to_f32() - 2.0).abs() < 0.05);

        let two = f16::from_f32(2.0).to_bits();
        let after_log = f16::from_bits(log[two as usize]);
        assert!((after_log.to_f32() - 1.0).abs() < 0.05);
    }

    #[test]
    fn non_finite_inputs_map_to_zero() {
        assert_eq!(exp_table()[f16::NAN.to_bits() as usize], 0);
        assert_eq!(exp_table()[f16::INFINITY.to_bits() as usize], 0);
        assert_eq!(log_table()[f16::NAN.to_bits() as usize], 0);
    }
}
