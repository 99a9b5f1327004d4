//! Gate short-circuit engine. Given a 4-bit truth table and the
//! compile-time states of both operand wires, tries to produce the result
//! without emitting a gate: constant evaluation, passthrough aliasing,
//! deferred inversion, and same-wire reductions.
//!
//! Table numbering (bit `2a + b` of the table is the output for inputs
//! `a`, `b`):
//!
//! ```text
//!  0 0000 constant 0        8 1000 AND
//!  1 0001 NOR               9 1001 XNOR
//!  2 0010                  10 1010 passthrough b
//!  3 0011 invert a         11 1011
//!  4 0100                  12 1100 passthrough a
//!  5 0101 invert b         13 1101
//!  6 0110 XOR              14 1110 OR
//!  7 0111 NAND             15 1111 constant 1
//! ```

use crate::wires::{WireArena, WireId, WireState};

/// Transforms a truth table for the inversion of one operand: the result is
/// the table of `f'` with `f'(a, b) = f(1 - a, b)` (for `a_or_b == false`)
/// or `f(a, 1 - b)` (for `a_or_b == true`).
pub fn invert_table(a_or_b: bool, table: u8) -> u8 {
    if a_or_b {
        ((table << 1) & 0b1010) | ((table >> 1) & 0b0101)
    } else {
        ((table << 2) & 0b1100) | ((table >> 2) & 0b0011)
    }
}

fn const_bit(state: WireState) -> u8 {
    match state {
        WireState::One => 1,
        _ => 0,
    }
}

fn set_const(arena: &mut WireArena, dest: WireId, one: bool) {
    arena[dest].state = if one { WireState::One } else { WireState::Zero };
}

/// Attempts to make `dest` carry the result of `table(a, b)` without a new
/// gate. Returns `true` on success; on `false` the caller must emit a gate.
pub fn short_cut(arena: &mut WireArena, a: WireId, b: WireId, mut table: u8, dest: WireId) -> bool {
    if arena[dest].other.is_some() && dest != a && dest != b {
        tracing::warn!(dest, "short-circuit destination still aliased");
    }
    if arena.refs(dest) != 0 {
        tracing::warn!(dest, refs = arena.refs(dest), "short-circuit destination still referenced");
    }

    // Both operands constant: evaluate the table.
    if arena[a].state.is_const() && arena[b].state.is_const() {
        let entry = (const_bit(arena[a].state) << 1) | const_bit(arena[b].state);
        set_const(arena, dest, (table >> entry) & 1 == 1);
        return true;
    }

    if table == 0 {
        set_const(arena, dest, false);
        return true;
    }
    if table == 15 {
        set_const(arena, dest, true);
        return true;
    }

    // Fold deferred operand inversions into the table so everything below
    // speaks in terms of wire labels.
    if arena[a].state == WireState::UnknownInvert {
        table = invert_table(false, table);
    }
    if arena[b].state == WireState::UnknownInvert {
        table = invert_table(true, table);
    }

    match table {
        3 => return invert_passthrough(arena, a, dest),
        5 => return invert_passthrough(arena, b, dest),
        10 => return passthrough(arena, b, dest),
        12 => return passthrough(arena, a, dest),
        _ => {}
    }

    let a_state = arena[a].state;
    let b_state = arena[b].state;

    // Absorbing constants.
    if table == 14 && (a_state == WireState::One || b_state == WireState::One) {
        set_const(arena, dest, true);
        return true;
    }
    if table == 8 && (a_state == WireState::Zero || b_state == WireState::Zero) {
        set_const(arena, dest, false);
        return true;
    }
    if table == 1 && (a_state == WireState::One || b_state == WireState::One) {
        set_const(arena, dest, false);
        return true;
    }
    if table == 7 && (a_state == WireState::Zero || b_state == WireState::Zero) {
        set_const(arena, dest, true);
        return true;
    }

    // One constant operand: the gate degenerates to a unary function of the
    // other operand, described by the two surviving table rows.
    if a_state == WireState::One {
        return one_is_const(arena, b, (table >> 2) & 1 == 1, (table >> 3) & 1 == 1, dest);
    }
    if a_state == WireState::Zero {
        return one_is_const(arena, b, table & 1 == 1, (table >> 1) & 1 == 1, dest);
    }
    if b_state == WireState::One {
        return one_is_const(arena, a, (table >> 1) & 1 == 1, (table >> 3) & 1 == 1, dest);
    }
    if b_state == WireState::Zero {
        return one_is_const(arena, a, table & 1 == 1, (table >> 2) & 1 == 1, dest);
    }

    // Both operands are the same wire.
    if a == b {
        match table {
            2 | 4 | 6 => set_const(arena, dest, false),
            9 | 11 | 13 => set_const(arena, dest, true),
            8 | 14 => {
                // Result is the operand itself.
                if dest == a {
                    if arena[dest].state == WireState::UnknownInvert {
                        arena[dest].state = WireState::Unknown;
                    }
                    return true;
                }
                match arena[a].state {
                    WireState::Unknown | WireState::UnknownInvert => {
                        arena[dest].state = WireState::UnknownAlias;
                        arena.add_ref(a, dest);
                    }
                    _ => {
                        arena[dest].state = arena[a].state;
                        let target = arena[a].other.expect("alias state carries a target");
                        arena.add_ref(target, dest);
                    }
                }
            }
            1 | 7 => {
                // Result is the inversion of the operand.
                if dest == a {
                    arena[dest].state = match arena[dest].state {
                        WireState::Unknown | WireState::UnknownInvert => WireState::UnknownInvert,
                        WireState::UnknownAlias => WireState::UnknownInvertAlias,
                        WireState::UnknownInvertAlias => WireState::UnknownAlias,
                        s => s,
                    };
                    return true;
                }
                match arena[a].state {
                    WireState::Unknown | WireState::UnknownInvert => {
                        arena[dest].state = WireState::UnknownInvertAlias;
                        arena.add_ref(a, dest);
                    }
                    WireState::UnknownAlias => {
                        arena[dest].state = WireState::UnknownInvertAlias;
                        let target = arena[a].other.expect("alias state carries a target");
                        arena.add_ref(target, dest);
                    }
                    WireState::UnknownInvertAlias => {
                        arena[dest].state = WireState::UnknownAlias;
                        let target = arena[a].other.expect("alias state carries a target");
                        arena.add_ref(target, dest);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        return true;
    }
    false
}

/// Same as [`short_cut`] but refuses to install `UnknownInvert` or
/// `UnknownInvertAlias` on the destination; where that would be the result
/// it returns `false` and the caller emits a compensating gate. Used where
/// downstream passes do not handle deferred inversion (carry chains).
pub fn short_cut_no_invert(
    arena: &mut WireArena,
    a: WireId,
    b: WireId,
    mut table: u8,
    dest: WireId,
) -> bool {
    if arena[dest].other.is_some() && dest != a && dest != b {
        tracing::warn!(dest, "short-circuit destination still aliased");
    }
    if arena.refs(dest) != 0 {
        tracing::warn!(dest, refs = arena.refs(dest), "short-circuit destination still referenced");
    }

    if arena[a].state.is_const() && arena[b].state.is_const() {
        let entry = (const_bit(arena[a].state) << 1) | const_bit(arena[b].state);
        set_const(arena, dest, (table >> entry) & 1 == 1);
        return true;
    }

    if table == 0 {
        set_const(arena, dest, false);
        return true;
    }
    if table == 15 {
        set_const(arena, dest, true);
        return true;
    }

    if arena[a].state == WireState::UnknownInvert {
        table = invert_table(false, table);
    }
    if arena[b].state == WireState::UnknownInvert {
        table = invert_table(true, table);
    }

    match table {
        3 => return invert_passthrough_no_invert(arena, a, dest),
        5 => return invert_passthrough_no_invert(arena, b, dest),
        10 => return passthrough_no_invert(arena, b, dest),
        12 => return passthrough_no_invert(arena, a, dest),
        _ => {}
    }

    let a_state = arena[a].state;
    let b_state = arena[b].state;

    if table == 14 && (a_state == WireState::One || b_state == WireState::One) {
        set_const(arena, dest, true);
        return true;
    }
    if table == 8 && (a_state == WireState::Zero || b_state == WireState::Zero) {
        set_const(arena, dest, false);
        return true;
    }
    if table == 1 && (a_state == WireState::One || b_state == WireState::One) {
        set_const(arena, dest, false);
        return true;
    }
    if table == 7 && (a_state == WireState::Zero || b_state == WireState::Zero) {
        set_const(arena, dest, true);
        return true;
    }

    if a_state == WireState::One {
        return one_is_const_no_invert(arena, b, (table >> 2) & 1 == 1, (table >> 3) & 1 == 1, dest);
    }
    if a_state == WireState::Zero {
        return one_is_const_no_invert(arena, b, table & 1 == 1, (table >> 1) & 1 == 1, dest);
    }
    if b_state == WireState::One {
        return one_is_const_no_invert(arena, a, (table >> 1) & 1 == 1, (table >> 3) & 1 == 1, dest);
    }
    if b_state == WireState::Zero {
        return one_is_const_no_invert(arena, a, table & 1 == 1, (table >> 2) & 1 == 1, dest);
    }

    if a == b {
        match table {
            2 | 4 | 6 => {
                set_const(arena, dest, false);
                return true;
            }
            9 | 11 | 13 => {
                set_const(arena, dest, true);
                return true;
            }
            8 | 14 => {
                if dest == a {
                    match arena[dest].state {
                        WireState::UnknownInvert => arena[dest].state = WireState::Unknown,
                        WireState::UnknownInvertAlias => return false,
                        _ => {}
                    }
                    return true;
                }
                match arena[a].state {
                    WireState::Unknown | WireState::UnknownInvert => {
                        arena[dest].state = WireState::UnknownAlias;
                        arena.add_ref(a, dest);
                    }
                    WireState::UnknownAlias => {
                        arena[dest].state = WireState::UnknownAlias;
                        let target = arena[a].other.expect("alias state carries a target");
                        arena.add_ref(target, dest);
                    }
                    _ => return false,
                }
                return true;
            }
            1 | 7 => {
                if dest == a {
                    if arena[dest].state == WireState::UnknownInvertAlias {
                        arena[dest].state = WireState::UnknownAlias;
                        return true;
                    }
                    return false;
                }
                if arena[a].state == WireState::UnknownInvertAlias {
                    arena[dest].state = WireState::UnknownAlias;
                    let target = arena[a].other.expect("alias state carries a target");
                    arena.add_ref(target, dest);
                    return true;
                }
                return false;
            }
            _ => return true,
        }
    }
    false
}

fn invert_passthrough(arena: &mut WireArena, w: WireId, dest: WireId) -> bool {
    match arena[w].state {
        WireState::One => {
            set_const(arena, dest, false);
            return true;
        }
        WireState::Zero => {
            set_const(arena, dest, true);
            return true;
        }
        _ => {}
    }

    if dest == w {
        arena[dest].state = match arena[dest].state {
            WireState::Unknown | WireState::UnknownInvert => WireState::UnknownInvert,
            WireState::UnknownAlias => WireState::UnknownInvertAlias,
            WireState::UnknownInvertAlias => WireState::UnknownAlias,
            s => s,
        };
        return true;
    }

    let (target, state) = match arena[w].state {
        WireState::UnknownAlias => {
            (arena[w].other.expect("alias state carries a target"), WireState::UnknownInvertAlias)
        }
        WireState::UnknownInvertAlias => {
            (arena[w].other.expect("alias state carries a target"), WireState::UnknownAlias)
        }
        _ => (w, WireState::UnknownInvertAlias),
    };
    arena[dest].state = state;
    arena.add_ref(target, dest);
    true
}

fn passthrough(arena: &mut WireArena, w: WireId, dest: WireId) -> bool {
    match arena[w].state {
        WireState::One => {
            set_const(arena, dest, true);
            return true;
        }
        WireState::Zero => {
            set_const(arena, dest, false);
            return true;
        }
        _ => {}
    }

    if dest == w {
        if arena[dest].state == WireState::UnknownInvert {
            arena[dest].state = WireState::Unknown;
        }
        return true;
    }

    let (target, state) = match arena[w].state {
        WireState::UnknownAlias => {
            (arena[w].other.expect("alias state carries a target"), WireState::UnknownAlias)
        }
        WireState::UnknownInvertAlias => {
            (arena[w].other.expect("alias state carries a target"), WireState::UnknownInvertAlias)
        }
        _ => (w, WireState::UnknownAlias),
    };
    arena[dest].state = state;
    arena.add_ref(target, dest);
    true
}

/// One operand is constant; `option0`/`option1` are the surviving table
/// rows for `w2 == 0` and `w2 == 1`.
fn one_is_const(
    arena: &mut WireArena,
    w2: WireId,
    option0: bool,
    option1: bool,
    dest: WireId,
) -> bool {
    if option0 && option1 {
        set_const(arena, dest, true);
        return true;
    }
    if !option0 && !option1 {
        set_const(arena, dest, false);
        return true;
    }

    if !option0 {
        // Identity of w2's label.
        if dest == w2 {
            if matches!(arena[dest].state, WireState::Unknown | WireState::UnknownInvert) {
                arena[dest].state = WireState::Unknown;
            }
            return true;
        }
        let (target, state) = match arena[w2].state {
            WireState::UnknownAlias => {
                (arena[w2].other.expect("alias state carries a target"), WireState::UnknownAlias)
            }
            WireState::UnknownInvertAlias => (
                arena[w2].other.expect("alias state carries a target"),
                WireState::UnknownInvertAlias,
            ),
            _ => (w2, WireState::UnknownAlias),
        };
        arena[dest].state = state;
        arena.add_ref(target, dest);
        return true;
    }

    // Inversion of w2's label.
    if dest == w2 {
        arena[dest].state = match arena[dest].state {
            WireState::Unknown | WireState::UnknownInvert => WireState::UnknownInvert,
            WireState::UnknownAlias => WireState::UnknownInvertAlias,
            WireState::UnknownInvertAlias => WireState::UnknownAlias,
            s => s,
        };
        return true;
    }
    let (target, state) = match arena[w2].state {
        WireState::UnknownAlias => {
            (arena[w2].other.expect("alias state carries a target"), WireState::UnknownInvertAlias)
        }
        WireState::UnknownInvertAlias => {
            (arena[w2].other.expect("alias state carries a target"), WireState::UnknownAlias)
        }
        _ => (w2, WireState::UnknownInvertAlias),
    };
    arena[dest].state = state;
    arena.add_ref(target, dest);
    true
}

fn invert_passthrough_no_invert(arena: &mut WireArena, w: WireId, dest: WireId) -> bool {
    match arena[w].state {
        WireState::One => {
            set_const(arena, dest, false);
            return true;
        }
        WireState::Zero => {
            set_const(arena, dest, true);
            return true;
        }
        _ => {}
    }

    if dest == w {
        if arena[dest].state == WireState::UnknownInvertAlias {
            arena[dest].state = WireState::UnknownAlias;
            return true;
        }
        return false;
    }

    if arena[w].state == WireState::UnknownInvertAlias {
        let target = arena[w].other.expect("alias state carries a target");
        arena[dest].state = WireState::UnknownAlias;
        arena.add_ref(target, dest);
        return true;
    }
    false
}

fn passthrough_no_invert(arena: &mut WireArena, w: WireId, dest: WireId) -> bool {
    match arena[w].state {
        WireState::One => {
            set_const(arena, dest, true);
            return true;
        }
        WireState::Zero => {
            set_const(arena, dest, false);
            return true;
        }
        _ => {}
    }

    if dest == w {
        match arena[dest].state {
            WireState::UnknownInvert => arena[dest].state = WireState::Unknown,
            WireState::UnknownInvertAlias => return false,
            _ => {}
        }
        return true;
    }

    let (target, state) = match arena[w].state {
        WireState::UnknownInvertAlias => return false,
        WireState::UnknownAlias => {
            (arena[w].other.expect("alias state carries a target"), WireState::UnknownAlias)
        }
        _ => (w, WireState::UnknownAlias),
    };
    arena[dest].state = state;
    arena.add_ref(target, dest);
    true
}

fn one_is_const_no_invert(
    arena: &mut WireArena,
    w2: WireId,
    option0: bool,
    option1: bool,
    dest: WireId,
) -> bool {
    if option0 && option1 {
        set_const(arena, dest, true);
        return true;
    }
    if !option0 && !option1 {
        set_const(arena, dest, false);
        return true;
    }

    if !option0 {
        if dest == w2 {
            match arena[w2].state {
                WireState::Unknown | WireState::UnknownInvert => {
                    arena[dest].state = WireState::Unknown;
                }
                WireState::UnknownInvertAlias => return false,
                _ => {}
            }
            return true;
        }
        if arena[w2].state == WireState::UnknownInvertAlias {
            return false;
        }
        let target = match arena[w2].state {
            WireState::UnknownAlias => arena[w2].other.expect("alias state carries a target"),
            _ => w2,
        };
        arena[dest].state = WireState::UnknownAlias;
        arena.add_ref(target, dest);
        return true;
    }

    // Inversion required: only an already-inverted alias can cancel out.
    if dest == w2 {
        if arena[w2].state == WireState::UnknownInvertAlias {
            arena[dest].state = WireState::UnknownAlias;
            return true;
        }
        return false;
    }
    if arena[w2].state == WireState::UnknownInvertAlias {
        let target = arena[w2].other.expect("alias state carries a target");
        arena[dest].state = WireState::UnknownAlias;
        arena.add_ref(target, dest);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(states: &[WireState]) -> (WireArena, Vec<WireId>) {
        let mut arena = WireArena::new();
        let ids = states
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let w = arena.alloc(i as u32);
                arena[w].state = s;
                w
            })
            .collect();
        (arena, ids)
    }

    #[test]
    fn invert_table_known_transforms() {
        // Inverting one operand of XOR yields XNOR and back.
        assert_eq!(invert_table(false, 6), 9);
        assert_eq!(invert_table(true, 6), 9);
        assert_eq!(invert_table(true, 9), 6);
        // AND with inverted a selects the a=0 rows.
        assert_eq!(invert_table(false, 8), 2);
        // Double inversion is the identity.
        for t in 0..16u8 {
            assert_eq!(invert_table(false, invert_table(false, t)), t);
            assert_eq!(invert_table(true, invert_table(true, t)), t);
        }
    }

    #[test]
    fn constant_operands_evaluate_every_table() {
        for table in 0..16u8 {
            for entry in 0..4u8 {
                let a_state = if entry & 2 != 0 { WireState::One } else { WireState::Zero };
                let b_state = if entry & 1 != 0 { WireState::One } else { WireState::Zero };
                let (mut arena, ids) = arena_with(&[a_state, b_state, WireState::Zero]);
                assert!(short_cut(&mut arena, ids[0], ids[1], table, ids[2]));
                let want = (table >> entry) & 1 == 1;
                assert_eq!(
                    arena[ids[2]].state,
                    if want { WireState::One } else { WireState::Zero },
                    "table {table} entry {entry}"
                );
            }
        }
    }

    #[test]
    fn xor_with_zero_aliases_the_operand() {
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::Zero, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[1], 6, ids[2]));
        assert_eq!(arena[ids[2]].state, WireState::UnknownAlias);
        assert_eq!(arena[ids[2]].other, Some(ids[0]));
        assert_eq!(arena.refs(ids[0]), 1);
    }

    #[test]
    fn xor_with_one_defers_an_inversion() {
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::One, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[1], 6, ids[2]));
        assert_eq!(arena[ids[2]].state, WireState::UnknownInvertAlias);
        assert_eq!(arena[ids[2]].other, Some(ids[0]));
    }

    #[test]
    fn no_invert_variant_refuses_deferred_inversion() {
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::One, WireState::Zero]);
        assert!(!short_cut_no_invert(&mut arena, ids[0], ids[1], 6, ids[2]));
        // The plain identity case still aliases.
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::Zero, WireState::Zero]);
        assert!(short_cut_no_invert(&mut arena, ids[0], ids[1], 6, ids[2]));
        assert_eq!(arena[ids[2]].state, WireState::UnknownAlias);
    }

    #[test]
    fn same_wire_reductions() {
        // x XOR x == 0
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[0], 6, ids[1]));
        assert_eq!(arena[ids[1]].state, WireState::Zero);

        // x XNOR x == 1
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[0], 9, ids[1]));
        assert_eq!(arena[ids[1]].state, WireState::One);

        // x AND x == x
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[0], 8, ids[1]));
        assert_eq!(arena[ids[1]].state, WireState::UnknownAlias);
        assert_eq!(arena[ids[1]].other, Some(ids[0]));

        // x NAND x == NOT x
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[0], 7, ids[1]));
        assert_eq!(arena[ids[1]].state, WireState::UnknownInvertAlias);
    }

    #[test]
    fn inverted_operand_transforms_the_table() {
        // a AND b with a in deferred-inversion state and b == 1 degenerates
        // to NOT(a's label).
        let (mut arena, ids) =
            arena_with(&[WireState::UnknownInvert, WireState::One, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[1], 8, ids[2]));
        assert_eq!(arena[ids[2]].state, WireState::UnknownInvertAlias);
        assert_eq!(arena[ids[2]].other, Some(ids[0]));
    }

    #[test]
    fn or_and_absorbing_constants() {
        let (mut arena, ids) = arena_with(&[WireState::Unknown, WireState::One, WireState::Zero]);
        assert!(short_cut(&mut arena, ids[0], ids[1], 14, ids[2]));
        assert_eq!(arena[ids[2]].state, WireState::One);

        let (mut arena, ids) = arena_with(&[WireState::Zero, WireState::Unknown, WireState::One]);
        assert!(short_cut(&mut arena, ids[0], ids[1], 8, ids[2]));
        assert_eq!(arena[ids[2]].state, WireState::Zero);
    }

    #[test]
    fn unknown_operands_do_not_short_circuit() {
        let (mut arena, ids) =
            arena_with(&[WireState::Unknown, WireState::Unknown, WireState::Zero]);
        assert!(!short_cut(&mut arena, ids[0], ids[1], 8, ids[2]));
        assert!(!short_cut_no_invert(&mut arena, ids[0], ids[1], 14, ids[2]));
    }
}
