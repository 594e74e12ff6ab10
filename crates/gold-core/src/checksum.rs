// SPDX-License-Identifier: Apache-2.0
//! Desync detection: canonical state serialization hashed with Adler-32.
//!
//! The byte stream is an explicit little-endian layout, never a memory dump:
//! entities in ascending id order, then map cell layers row-major, then fog
//! grids, then player gold and upgrades. The event list is excluded. Scalar
//! and SIMD Adler-32 must produce identical output for every payload;
//! setting `GOLD_SIMD_CHECKSUM_TEST=1` cross-checks them on live data.

use bytes::BufMut;

use crate::map::{CellLayer, CELL_LAYER_COUNT};
use crate::state::MatchState;
use crate::target::Target;

const MOD_ADLER: u32 = 65_521;
/// Largest byte count whose sums fit in u32 before reduction.
const NMAX: usize = 5552;

/// Reference Adler-32.
#[must_use]
pub fn adler32_scalar(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for chunk in data.chunks(NMAX) {
        for byte in chunk {
            a += u32::from(*byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    a | (b << 16)
}

#[cfg(target_arch = "x86_64")]
#[allow(unsafe_code)]
mod simd {
    //! SSSE3 Adler-32, 32 bytes per iteration.

    use super::{MOD_ADLER, NMAX};

    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::{
        __m128i, _mm_add_epi32, _mm_cvtsi128_si32, _mm_loadu_si128, _mm_madd_epi16,
        _mm_maddubs_epi16, _mm_sad_epu8, _mm_set1_epi16, _mm_set_epi32, _mm_setr_epi8,
        _mm_setzero_si128, _mm_shuffle_epi32, _mm_slli_epi32,
    };

    const BLOCK_SIZE: usize = 32;

    /// # Safety
    ///
    /// The caller must have verified SSSE3 support.
    #[target_feature(enable = "ssse3")]
    pub unsafe fn adler32_ssse3(data: &[u8]) -> u32 {
        let mut a: u32 = 1;
        let mut b: u32 = 0;

        let mut blocks_remaining = data.len() / BLOCK_SIZE;
        let mut offset = 0usize;

        // SAFETY: loads are unaligned (`loadu`) and `offset + 32` never
        // exceeds `blocks_remaining * BLOCK_SIZE <= data.len()`.
        unsafe {
            let tap1 = _mm_setr_epi8(32, 31, 30, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20, 19, 18, 17);
            let tap2 = _mm_setr_epi8(16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1);
            let zero = _mm_setzero_si128();
            let ones = _mm_set1_epi16(1);

            while blocks_remaining > 0 {
                let n = (NMAX / BLOCK_SIZE).min(blocks_remaining);
                blocks_remaining -= n;

                let mut v_ps = _mm_set_epi32(0, 0, 0, (a * n as u32) as i32);
                let mut v_s2 = _mm_set_epi32(0, 0, 0, b as i32);
                let mut v_s1 = _mm_setzero_si128();

                for _ in 0..n {
                    let ptr = data.as_ptr().add(offset);
                    let bytes1 = _mm_loadu_si128(ptr.cast::<__m128i>());
                    let bytes2 = _mm_loadu_si128(ptr.add(16).cast::<__m128i>());
                    offset += BLOCK_SIZE;

                    // Previous block byte sums feed the weighted sum.
                    v_ps = _mm_add_epi32(v_ps, v_s1);

                    v_s1 = _mm_add_epi32(v_s1, _mm_sad_epu8(bytes1, zero));
                    let mad1 = _mm_maddubs_epi16(bytes1, tap1);
                    v_s2 = _mm_add_epi32(v_s2, _mm_madd_epi16(mad1, ones));

                    v_s1 = _mm_add_epi32(v_s1, _mm_sad_epu8(bytes2, zero));
                    let mad2 = _mm_maddubs_epi16(bytes2, tap2);
                    v_s2 = _mm_add_epi32(v_s2, _mm_madd_epi16(mad2, ones));
                }

                v_s2 = _mm_add_epi32(v_s2, _mm_slli_epi32(v_ps, 5));

                // A B C D -> B A D C, then C D A B: horizontal sums.
                v_s1 = _mm_add_epi32(v_s1, _mm_shuffle_epi32(v_s1, 0b10_11_00_01));
                v_s1 = _mm_add_epi32(v_s1, _mm_shuffle_epi32(v_s1, 0b01_00_11_10));
                a = a.wrapping_add(_mm_cvtsi128_si32(v_s1) as u32);

                v_s2 = _mm_add_epi32(v_s2, _mm_shuffle_epi32(v_s2, 0b10_11_00_01));
                v_s2 = _mm_add_epi32(v_s2, _mm_shuffle_epi32(v_s2, 0b01_00_11_10));
                b = _mm_cvtsi128_si32(v_s2) as u32;

                a %= MOD_ADLER;
                b %= MOD_ADLER;
            }
        }

        for byte in &data[offset..] {
            a += u32::from(*byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;

        a | (b << 16)
    }
}

/// Adler-32 over a payload, using the SIMD lane when the CPU has it.
#[must_use]
pub fn adler32(data: &[u8]) -> u32 {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("ssse3") {
            // SAFETY: feature checked above.
            #[allow(unsafe_code)]
            let simd_sum = unsafe { simd::adler32_ssse3(data) };
            if simd_test_enabled() {
                let scalar_sum = adler32_scalar(data);
                if simd_sum == scalar_sum {
                    tracing::info!(simd_sum, scalar_sum, "simd checksum test pass");
                } else {
                    tracing::error!(simd_sum, scalar_sum, "simd checksum test fail");
                }
                debug_assert_eq!(simd_sum, scalar_sum);
            }
            return simd_sum;
        }
    }
    adler32_scalar(data)
}

fn simd_test_enabled() -> bool {
    static ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("GOLD_SIMD_CHECKSUM_TEST").is_some())
}

/// Canonical serialization of everything peers must agree on.
#[must_use]
pub fn serialize_match_state(state: &MatchState) -> Vec<u8> {
    let mut out = Vec::new();

    // 1) Entities, ascending id.
    let ids = state.entities.ids_ascending();
    out.put_u32_le(ids.len() as u32);
    for id in ids {
        let Some(entity) = state.entities.get(id) else {
            continue;
        };
        out.put_u32_le(id);
        out.put_u8(entity.entity_type as u8);
        out.put_u8(entity.mode as u8);
        out.put_u8(entity.player_id);
        out.put_u32_le(entity.flags);
        out.put_i32_le(entity.cell.x);
        out.put_i32_le(entity.cell.y);
        out.put_i32_le(entity.position.x.raw());
        out.put_i32_le(entity.position.y.raw());
        out.put_u8(entity.direction as u8);
        out.put_i32_le(entity.health);
        out.put_u32_le(entity.gold_held);
        out.put_u32_le(entity.garrison_id);
        out.put_u32_le(entity.timer);
        out.put_u32_le(entity.cooldown_timer);
        serialize_target(&mut out, &entity.target);
        out.put_u8(entity.target_queue.len() as u8);
        for target in &entity.target_queue {
            serialize_target(&mut out, target);
        }
        out.put_u32_le(entity.path.len() as u32);
        for cell in &entity.path {
            out.put_i32_le(cell.x);
            out.put_i32_le(cell.y);
        }
    }

    // 2) Map: dimensions, elevations, then both cell layers row-major.
    out.put_u32_le(state.map.width as u32);
    out.put_u32_le(state.map.height as u32);
    for y in 0..state.map.height {
        for x in 0..state.map.width {
            out.put_u8(state.map.tile(crate::fixed::IVec2::new(x, y)).elevation);
        }
    }
    for layer in [CellLayer::Ground, CellLayer::Sky] {
        for y in 0..state.map.height {
            for x in 0..state.map.width {
                let cell = state.map.cell(layer, crate::fixed::IVec2::new(x, y));
                out.put_u8(cell.kind.as_byte());
                out.put_u32_le(cell.id);
            }
        }
    }
    debug_assert_eq!(CELL_LAYER_COUNT, 2);

    // 3) Fog, per team.
    for fog in &state.fog {
        fog.serialize_levels(&mut out);
    }

    // 4) Players.
    for player in &state.players {
        out.put_u8(u8::from(player.active));
        out.put_u32_le(player.gold);
        out.put_u32_le(player.upgrades);
        out.put_u32_le(player.upgrades_in_progress);
    }

    out
}

fn serialize_target(out: &mut Vec<u8>, target: &Target) {
    out.put_u8(target.tag());
    match target {
        Target::None => {}
        Target::Cell(cell)
        | Target::AttackCell(cell)
        | Target::Unload(cell)
        | Target::Smoke(cell) => {
            out.put_i32_le(cell.x);
            out.put_i32_le(cell.y);
        }
        Target::Entity(id)
        | Target::AttackEntity(id)
        | Target::Repair(id)
        | Target::BuildAssist(id) => {
            out.put_u32_le(*id);
        }
        Target::Build {
            building,
            unit_cell,
            building_cell,
        } => {
            out.put_u8(*building as u8);
            out.put_i32_le(unit_cell.x);
            out.put_i32_le(unit_cell.y);
            out.put_i32_le(building_cell.x);
            out.put_i32_le(building_cell.y);
        }
    }
}

/// Checksum of the whole match state.
#[must_use]
pub fn match_checksum(state: &MatchState) -> u32 {
    adler32(&serialize_match_state(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::Noise;
    use crate::player::{MatchPlayer, MAX_PLAYERS};
    use crate::state::match_init;
    use proptest::prelude::*;

    #[test]
    fn known_adler_vectors() {
        assert_eq!(adler32_scalar(b""), 1);
        assert_eq!(adler32_scalar(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn scalar_handles_nmax_boundaries() {
        for len in [NMAX - 1, NMAX, NMAX + 1, NMAX * 2 + 17] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            // Slow two-pass reference.
            let mut a: u64 = 1;
            let mut b: u64 = 0;
            for byte in &data {
                a = (a + u64::from(*byte)) % u64::from(MOD_ADLER);
                b = (b + a) % u64::from(MOD_ADLER);
            }
            let expected = (a | (b << 16)) as u32;
            assert_eq!(adler32_scalar(&data), expected, "len {len}");
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn simd_matches_scalar() {
        if !std::arch::is_x86_feature_detected!("ssse3") {
            return;
        }
        for len in [0usize, 1, 15, 16, 31, 32, 33, 1024, NMAX, NMAX + 33] {
            let data: Vec<u8> = (0..len).map(|i| (i * 131 % 256) as u8).collect();
            // SAFETY: feature checked above.
            #[allow(unsafe_code)]
            let simd_sum = unsafe { simd::adler32_ssse3(&data) };
            assert_eq!(simd_sum, adler32_scalar(&data), "len {len}");
        }
    }

    fn players() -> [MatchPlayer; MAX_PLAYERS] {
        let mut players: [MatchPlayer; MAX_PLAYERS] = Default::default();
        players[0].active = true;
        players[1].active = true;
        players[1].team = 1;
        players
    }

    #[test]
    fn identical_states_share_checksums() {
        let noise = Noise::zeroed(64, 64);
        let a = match_init(42, &noise, players());
        let b = match_init(42, &noise, players());
        assert_eq!(match_checksum(&a), match_checksum(&b));
        let c = match_init(43, &noise, players());
        assert_ne!(match_checksum(&a), match_checksum(&c));
    }

    proptest! {
        #[test]
        fn scalar_equals_simd_on_arbitrary_payloads(data in prop::collection::vec(any::<u8>(), 0..20_000)) {
            prop_assert_eq!(adler32(&data), adler32_scalar(&data));
        }
    }
}
