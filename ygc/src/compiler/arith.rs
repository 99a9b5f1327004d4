//! Gate-level arithmetic: ripple-carry addition and subtraction, signed and
//! unsigned shift-and-add multiplication (right trapezoid, low bits only),
//! non-restoring division/modulus with a sentinel bit, comparison and
//! equality. These routines dominate circuit size; they reuse a fixed set
//! of scratch wires per bit instead of allocating per stage.

use super::Compiler;
use crate::wires::{WireId, WireState};

impl Compiler {
    /// Resets a scratch wire when nothing references it.
    fn reset_if_unreffed(&mut self, w: WireId) {
        if self.arena.refs(w) == 0 {
            self.arena[w].state = WireState::Zero;
            self.arena.free_refs(w);
        }
    }

    /// Equality: XNOR every bit pair, AND-reduce.
    pub(crate) fn output_equals(&mut self, left: &[WireId], right: &[WireId]) -> WireId {
        let mut outputwire = None;
        for (i, &wl) in left.iter().enumerate() {
            let t = self.invert_wire_no_invert(wl);
            let currentxor = self.output_gate_no_invert(6, t, right[i]);
            match outputwire {
                None => outputwire = Some(currentxor),
                Some(out) => self.output_gate_to_dest(8, currentxor, out, out),
            }
        }
        outputwire.expect("equality of empty operands")
    }

    /// Less-than: the sign bit of `left - right`, with both operands
    /// sign-extended by one bit for correctness.
    pub(crate) fn output_less_than(&mut self, left: &[WireId], right: &[WireId]) -> WireId {
        if left.len() == 1 {
            return self.output_gate(4, right[0], left[0]);
        }

        let mut carry = self.pool.get_wire(&mut self.arena);
        let mut xorab = self.pool.get_wire(&mut self.arena);
        let mut xorac = self.pool.get_wire(&mut self.arena);
        let mut and1 = self.pool.get_wire(&mut self.arena);

        let mut lleft = left.to_vec();
        let mut lright = right.to_vec();
        lleft.push(left[left.len() - 1]);
        lright.push(right[right.len() - 1]);
        let length = lleft.len();

        let mut outputwire = self.w0;
        for i in 0..length {
            let na = self.invert_wire_no_invert(lleft[i]);

            xorab = self.clear_wire_for_reuse(xorab);
            self.output_gate_to_dest(6, lright[i], na, xorab);

            if i < length - 1 {
                xorac = self.clear_wire_for_reuse(xorac);
                self.output_gate_to_dest(6, carry, na, xorac);

                and1 = self.clear_wire_for_reuse(and1);
                self.output_gate_no_invert_to_dest(8, xorab, xorac, and1);

                carry = self.clear_wire_for_reuse(carry);
                self.output_gate_no_invert_to_dest(6, na, and1, carry);
            } else {
                let t = self.invert_wire_no_invert(xorab);
                outputwire = self.output_gate_no_invert(6, t, carry);
            }
        }
        outputwire
    }

    /// Subtraction `left - right`, computed as `NOT(NOT(left) + right)` so
    /// no initial carry is needed.
    pub(crate) fn output_subtract(&mut self, left: &[WireId], right: &[WireId], dest: &mut [WireId]) {
        let length = left.len();

        if length == 1 {
            dest[0] = self.output_gate(6, right[0], left[0]);
            return;
        }

        let mut carry = self.pool.get_wire(&mut self.arena);
        let mut xorab = self.pool.get_wire(&mut self.arena);
        let mut xorac = self.pool.get_wire(&mut self.arena);
        let mut and1 = self.pool.get_wire(&mut self.arena);
        let mut na;

        for i in 0..length {
            na = self.invert_wire_no_invert(left[i]);
            xorab = self.clear_wire_for_reuse(xorab);
            self.output_gate_to_dest(6, right[i], na, xorab);

            let t = self.invert_wire_no_invert(xorab);
            self.output_gate_no_invert_to_dest(6, t, carry, dest[i]);

            if i < length - 1 {
                xorac = self.clear_wire_for_reuse(xorac);
                self.output_gate_to_dest(6, carry, na, xorac);

                and1 = self.clear_wire_for_reuse(and1);
                self.output_gate_no_invert_to_dest(8, xorab, xorac, and1);

                carry = self.clear_wire_for_reuse(carry);
                self.output_gate_no_invert_to_dest(6, na, and1, carry);
            }
        }
        self.pool.free_wire(&mut self.arena, carry);
        self.pool.free_wire(&mut self.arena, xorab);
        self.pool.free_wire(&mut self.arena, xorac);
        self.pool.free_wire(&mut self.arena, and1);
    }

    /// Ripple-carry addition with the carry recurrence
    /// `c' = a ⊕ ((c ⊕ a) ∧ (a ⊕ b))`; the final carry is discarded.
    pub(crate) fn output_addition(&mut self, left: &[WireId], right: &[WireId], dest: &[WireId]) {
        let length = left.len();

        if length == 1 {
            self.output_gate_to_dest(6, right[0], left[0], dest[0]);
            return;
        }

        let mut carry = self.pool.get_wire(&mut self.arena);
        let mut xorab = self.pool.get_wire(&mut self.arena);
        let mut xorac = self.pool.get_wire(&mut self.arena);
        let mut and1 = self.pool.get_wire(&mut self.arena);

        for i in 0..length {
            xorab = self.clear_wire_for_reuse(xorab);
            self.output_gate_no_invert_to_dest(6, right[i], left[i], xorab);
            self.output_gate_no_invert_to_dest(6, xorab, carry, dest[i]);

            if i < length - 1 {
                xorac = self.clear_wire_for_reuse(xorac);
                self.output_gate_to_dest(6, carry, left[i], xorac);

                and1 = self.clear_wire_for_reuse(and1);
                self.output_gate_no_invert_to_dest(8, xorab, xorac, and1);

                carry = self.clear_wire_for_reuse(carry);
                self.output_gate_no_invert_to_dest(6, left[i], and1, carry);
            }
        }
        self.pool.free_wire(&mut self.arena, carry);
        self.pool.free_wire(&mut self.arena, xorab);
        self.pool.free_wire(&mut self.arena, xorac);
        self.pool.free_wire(&mut self.arena, and1);
    }

    /// Signed multiplication (two's complement, Baugh-Wooley style): only
    /// the right side of the trapezoid is computed since the result keeps
    /// the operand width. The last partial row and the top bit of the first
    /// row are inverted.
    pub(crate) fn output_mult_signed(&mut self, left: &[WireId], right: &[WireId], dest: &[WireId]) {
        let length = left.len();

        if length == 1 {
            self.output_gate_to_dest(8, left[0], right[0], dest[0]);
            return;
        }

        let mut rowleft: Vec<WireId> = vec![self.w0; length];
        let mut rowright: Vec<WireId> = vec![self.w0; length];

        let carry = self.pool.get_wire(&mut self.arena);
        let mut xorab = self.pool.get_wire(&mut self.arena);
        let mut andn = self.pool.get_wire(&mut self.arena);

        for i in 0..length - 1 {
            if i == 0 {
                for k in 0..length {
                    rowleft[k] = self.output_gate(8, left[k], right[0]);
                }
                rowleft[length - 1] = self.invert_wire_no_alloc(rowleft[length - 1]);

                for k in 0..length - 1 {
                    rowright[k] = self.output_gate(8, left[k], right[1]);
                }
                self.assign_wire(dest[0], rowleft[0]);

                // Shift the first row down one position.
                for k in 0..length - 1 {
                    self.assign_wire(rowleft[k], rowleft[k + 1]);
                }
                if i == length - 2 {
                    rowright[0] = self.invert_wire_no_alloc(rowright[0]);
                }
            } else {
                for k in 0..length - 1 - i {
                    rowright[k] = self.clear_wire_for_reuse(rowright[k]);
                    self.output_gate_to_dest(8, left[k], right[i + 1], rowright[k]);
                }
                if i == length - 2 {
                    rowright[0] = self.invert_wire_no_alloc(rowright[0]);
                }
            }

            for j in 0..length - i - 1 {
                if j == 0 {
                    self.output_gate_to_dest(6, rowright[0], rowleft[0], dest[i + 1]);
                    if i != length - 2 {
                        self.output_gate_to_dest(8, rowright[0], rowleft[0], carry);
                    }
                } else {
                    xorab = self.clear_wire_for_reuse(xorab);
                    self.output_gate_to_dest(6, rowright[j], rowleft[j], xorab);

                    rowleft[j - 1] = self.clear_wire_for_reuse(rowleft[j - 1]);
                    self.output_gate_to_dest(6, xorab, carry, rowleft[j - 1]);

                    if j < length - 1 - i - 1 {
                        andn = self.clear_wire_for_reuse(andn);
                        self.output_gate_to_dest(6, carry, rowleft[j], andn);
                        self.output_gate_to_dest(8, xorab, andn, andn);
                        self.output_gate_to_dest(6, rowleft[j], andn, carry);
                    }
                }
                self.reset_if_unreffed(andn);
                self.reset_if_unreffed(xorab);
            }
        }
        self.pool.free_singles_if_no_refs(&mut self.arena);
    }

    /// Unsigned multiplication: the same trapezoid without the sign
    /// inversions.
    pub(crate) fn output_mult_unsigned(
        &mut self,
        left: &[WireId],
        right: &[WireId],
        dest: &mut [WireId],
    ) {
        let length = left.len();

        if length == 1 {
            dest[0] = self.output_gate(8, left[0], right[0]);
            return;
        }

        let mut rowleft: Vec<WireId> = vec![self.w0; length];
        let mut rowright: Vec<WireId> = vec![self.w0; length];

        let mut carry = self.pool.get_wire(&mut self.arena);
        let mut xorab = self.pool.get_wire(&mut self.arena);
        let mut andn = self.pool.get_wire(&mut self.arena);

        for i in 0..length - 1 {
            if i == 0 {
                for k in 0..length {
                    rowleft[k] = self.output_gate(8, left[k], right[0]);
                }
                for k in 0..length - 1 {
                    rowright[k] = self.output_gate(8, left[k], right[1]);
                }
                self.assign_wire(dest[0], rowleft[0]);
                for k in 0..length - 1 {
                    self.assign_wire(rowleft[k], rowleft[k + 1]);
                }
            } else {
                for k in 0..length - 1 - i {
                    rowright[k] = self.clear_wire_for_reuse(rowright[k]);
                    self.output_gate_to_dest(8, left[k], right[i + 1], rowright[k]);
                }
            }

            for j in 0..length - i - 1 {
                if j == 0 {
                    xorab = self.clear_wire_for_reuse(xorab);
                    self.output_gate_to_dest(6, rowright[0], rowleft[0], xorab);
                    self.assign_wire(dest[i + 1], xorab);
                    carry = self.clear_wire_for_reuse(carry);

                    if i != length - 2 {
                        self.output_gate_to_dest(8, rowright[0], rowleft[0], carry);
                    }
                } else {
                    xorab = self.clear_wire_for_reuse(xorab);
                    self.output_gate_to_dest(6, rowright[j], rowleft[j], xorab);

                    rowleft[j - 1] = self.clear_wire_for_reuse(rowleft[j - 1]);
                    self.output_gate_to_dest(6, xorab, carry, rowleft[j - 1]);

                    if j < length - 1 - i - 1 {
                        andn = self.clear_wire_for_reuse(andn);
                        self.output_gate_to_dest(6, carry, rowleft[j], andn);
                        self.output_gate_to_dest(8, xorab, andn, andn);
                        self.output_gate_to_dest(6, rowleft[j], andn, carry);
                    }
                }
                self.reset_if_unreffed(andn);
                self.reset_if_unreffed(xorab);
            }
        }
        self.pool.free_singles_if_no_refs(&mut self.arena);
    }

    /// Unsigned non-restoring division (quotient) or modulus. The dividend
    /// is extended by one sentinel bit; each of the L+1 stages adds or
    /// subtracts the divisor depending on the previous remainder's sign,
    /// and the quotient bit is the inverted top of the remainder. Two
    /// alternating pools of keep-wires avoid a fresh layer per stage.
    pub(crate) fn output_divide_unsigned(
        &mut self,
        left: &[WireId],
        right: &[WireId],
        dest: &[WireId],
        is_mod: bool,
    ) {
        let origlength = left.len();
        let length = origlength + 1;

        let mut carry = self.pool.get_wire(&mut self.arena);
        let mut xorab = self.pool.get_wire(&mut self.arena);
        let mut xorac = self.pool.get_wire(&mut self.arena);
        let mut and1 = self.pool.get_wire(&mut self.arena);
        let mut xortout = self.pool.get_wire(&mut self.arena);

        let mut lleft = left.to_vec();
        lleft.push(self.w0);
        let mut lright = right.to_vec();
        lright.push(self.w0);

        let inputx = lright.clone();
        let mut inputy = Vec::with_capacity(length);
        inputy.push(lleft[length - 1]);
        for _ in 1..length {
            inputy.push(self.pool.get_wire(&mut self.arena));
        }

        let mut t = self.w1;
        let mut remainw: Vec<Option<WireId>> = vec![None; length];
        let mut ldest: Vec<Option<WireId>> = vec![None; length];
        let mut keep_a: Vec<WireId> = Vec::new();
        let mut keep_b: Vec<WireId> = Vec::new();

        for i in 0..length {
            if i == 0 {
                self.arena[carry].state = WireState::One;
            } else {
                inputy[0] = lleft[length - 1 - i];
                for j in 1..length {
                    let rw = remainw[j - 1].expect("remainder wire set in previous stage");
                    self.assign_wire(inputy[j], rw);
                }
                self.assign_wire(carry, t);
            }

            // Controlled add/subtract of the divisor.
            for j in 0..length {
                xortout = self.clear_wire_for_reuse(xortout);
                self.output_gate_no_invert_to_dest(6, t, inputx[j], xortout);

                xorab = self.clear_wire_for_reuse(xorab);
                self.output_gate_no_invert_to_dest(6, inputy[j], xortout, xorab);

                match remainw[j] {
                    Some(mut rw) => {
                        // Keep-wires from stage i stay alive for stage i+1
                        // instead of allocating a fresh layer.
                        if self.arena.refs(rw) > 0 {
                            if i % 2 == 0 {
                                keep_a.push(rw);
                                rw = keep_b
                                    .pop()
                                    .unwrap_or_else(|| self.pool.get_wire(&mut self.arena));
                            } else {
                                keep_b.push(rw);
                                rw = keep_a
                                    .pop()
                                    .unwrap_or_else(|| self.pool.get_wire(&mut self.arena));
                            }
                        }
                        let rw = self.clear_wire_for_reuse(rw);
                        self.output_gate_to_dest(6, xorab, carry, rw);
                        remainw[j] = Some(rw);
                    }
                    None => {
                        remainw[j] = Some(self.output_gate(6, xorab, carry));
                    }
                }

                if j < length - 1 {
                    xorac = self.clear_wire_for_reuse(xorac);
                    self.output_gate_to_dest(6, carry, xortout, xorac);

                    and1 = self.clear_wire_for_reuse(and1);
                    self.output_gate_no_invert_to_dest(8, xorab, xorac, and1);

                    carry = self.clear_wire_for_reuse(carry);
                    self.output_gate_no_invert_to_dest(6, xortout, and1, carry);
                }

                self.reset_if_unreffed(xortout);
                self.reset_if_unreffed(xorab);
                self.reset_if_unreffed(xorac);
                self.reset_if_unreffed(and1);
            }

            let top = remainw[length - 1].expect("remainder top wire set");
            t = self.invert_wire_no_invert(top);

            if !is_mod {
                ldest[length - 1 - i] = Some(t);
            }
        }

        let ldest: Vec<WireId> = if is_mod {
            remainw.iter().map(|w| w.expect("remainder complete")).collect()
        } else {
            ldest.iter().map(|w| w.expect("quotient complete")).collect()
        };

        if is_mod {
            // If the final remainder is negative, add the divisor back.
            let add_dest = self.pool.get_wires(&mut self.arena, length as crate::types::Num);
            self.output_addition(&ldest, &lright, &add_dest);
            let cond = ldest[dest.len()];
            for i in 0..length {
                self.assign_wire_cond(ldest[i], add_dest[i], cond);
            }
            self.pool.free_set(&mut self.arena, &add_dest);
        }

        for i in 0..origlength {
            self.assign_wire(dest[i], ldest[i]);
        }
        self.pool.free_singles_if_no_refs(&mut self.arena);
    }

    /// Signed division/modulus: take absolute values with a sign-gated
    /// subtract from zero, divide unsigned, then conditionally negate the
    /// result (quotient sign is the XOR of the operand signs, remainder
    /// sign follows the dividend).
    pub(crate) fn output_divide_signed(
        &mut self,
        left: &[WireId],
        right: &[WireId],
        dest: &[WireId],
        is_mod: bool,
    ) {
        let origlength = left.len();
        let length = origlength + 1;

        let mut carry = self.pool.get_wire(&mut self.arena);
        let mut xorab = self.pool.get_wire(&mut self.arena);
        let mut xorac = self.pool.get_wire(&mut self.arena);
        let mut and1 = self.pool.get_wire(&mut self.arena);
        let mut xortout = self.pool.get_wire(&mut self.arena);

        let mut lleft = Vec::with_capacity(length);
        let mut lright = Vec::with_capacity(length);
        for i in 0..origlength {
            let wl = self.pool.get_wire(&mut self.arena);
            self.assign_wire(wl, left[i]);
            lleft.push(wl);
            let wr = self.pool.get_wire(&mut self.arena);
            self.assign_wire(wr, right[i]);
            lright.push(wr);
        }
        lleft.push(self.w0);
        lright.push(self.w0);

        let ifsubtractl = self.pool.get_wire(&mut self.arena);
        let ifsubtractr = self.pool.get_wire(&mut self.arena);
        self.assign_wire(ifsubtractl, lleft[origlength - 1]);
        self.assign_wire(ifsubtractr, lright[origlength - 1]);

        let mut zeros = vec![self.w0; origlength];
        let mut sub_dest_l = self.pool.get_wires(&mut self.arena, origlength as crate::types::Num);
        let mut sub_dest_r = self.pool.get_wires(&mut self.arena, origlength as crate::types::Num);
        self.output_subtract(&zeros, left, &mut sub_dest_l);
        self.output_subtract(&zeros, right, &mut sub_dest_r);
        for i in 0..origlength {
            self.assign_wire_cond(lleft[i], sub_dest_l[i], ifsubtractl);
            self.assign_wire_cond(lright[i], sub_dest_r[i], ifsubtractr);
        }

        let inputx = lright.clone();
        let mut inputy = Vec::with_capacity(length);
        inputy.push(lleft[length - 1]);
        for _ in 1..length {
            inputy.push(self.pool.get_wire(&mut self.arena));
        }

        let mut t = self.w1;
        let mut remainw: Vec<Option<WireId>> = vec![None; length];
        let mut ldest_opt: Vec<Option<WireId>> = vec![None; length];
        let mut keep_a: Vec<WireId> = Vec::new();
        let mut keep_b: Vec<WireId> = Vec::new();

        for i in 0..length {
            if i == 0 {
                self.arena[carry].state = WireState::One;
            } else {
                inputy[0] = lleft[length - 1 - i];
                for j in 1..length {
                    let rw = remainw[j - 1].expect("remainder wire set in previous stage");
                    self.assign_wire(inputy[j], rw);
                }
                self.assign_wire(carry, t);
            }

            for j in 0..length {
                xortout = self.clear_wire_for_reuse(xortout);
                self.output_gate_no_invert_to_dest(6, t, inputx[j], xortout);

                xorab = self.clear_wire_for_reuse(xorab);
                self.output_gate_no_invert_to_dest(6, inputy[j], xortout, xorab);

                match remainw[j] {
                    Some(mut rw) => {
                        if self.arena.refs(rw) > 0 {
                            if i % 2 == 0 {
                                keep_a.push(rw);
                                rw = keep_b
                                    .pop()
                                    .unwrap_or_else(|| self.pool.get_wire(&mut self.arena));
                            } else {
                                keep_b.push(rw);
                                rw = keep_a
                                    .pop()
                                    .unwrap_or_else(|| self.pool.get_wire(&mut self.arena));
                            }
                        }
                        let rw = self.clear_wire_for_reuse(rw);
                        self.output_gate_to_dest(6, xorab, carry, rw);
                        remainw[j] = Some(rw);
                    }
                    None => {
                        remainw[j] = Some(self.output_gate(6, xorab, carry));
                    }
                }

                if j < length - 1 {
                    xorac = self.clear_wire_for_reuse(xorac);
                    self.output_gate_to_dest(6, carry, xortout, xorac);

                    and1 = self.clear_wire_for_reuse(and1);
                    self.output_gate_no_invert_to_dest(8, xorab, xorac, and1);

                    carry = self.clear_wire_for_reuse(carry);
                    self.output_gate_no_invert_to_dest(6, xortout, and1, carry);
                }

                self.reset_if_unreffed(xortout);
                self.reset_if_unreffed(xorab);
                self.reset_if_unreffed(xorac);
                self.reset_if_unreffed(and1);
            }

            let top = remainw[length - 1].expect("remainder top wire set");
            t = self.invert_wire_no_invert(top);

            if !is_mod {
                ldest_opt[length - 1 - i] = Some(t);
            }
        }

        let ldest: Vec<WireId> = if is_mod {
            remainw.iter().map(|w| w.expect("remainder complete")).collect()
        } else {
            ldest_opt.iter().map(|w| w.expect("quotient complete")).collect()
        };

        if is_mod {
            let add_dest = self.pool.get_wires(&mut self.arena, length as crate::types::Num);
            self.output_addition(&ldest, &lright, &add_dest);
            let cond = ldest[dest.len()];
            for i in 0..length {
                self.assign_wire_cond(ldest[i], add_dest[i], cond);
            }

            // Remainder takes the dividend's sign.
            let mut result_sub = self.pool.get_wires(&mut self.arena, length as crate::types::Num);
            zeros.push(self.w0);
            self.output_subtract(&zeros, &ldest, &mut result_sub);
            for i in 0..length {
                self.assign_wire_cond(ldest[i], result_sub[i], ifsubtractl);
            }
            self.pool.free_set(&mut self.arena, &add_dest);
            self.pool.free_set(&mut self.arena, &result_sub);
        } else {
            // Quotient sign is the XOR of the operand signs.
            let mut result_sub = self.pool.get_wires(&mut self.arena, length as crate::types::Num);
            self.output_subtract(&zeros[..origlength], &ldest[..origlength], &mut result_sub);

            let result = self.output_gate_no_invert(6, ifsubtractl, ifsubtractr);
            for i in 0..length {
                self.assign_wire_cond(ldest[i], result_sub[i], result);
            }
            self.pool.free_set(&mut self.arena, &result_sub);
        }

        for i in 0..origlength {
            self.assign_wire(dest[i], ldest[i]);
        }
        self.pool.free_set(&mut self.arena, &sub_dest_l);
        self.pool.free_set(&mut self.arena, &sub_dest_r);
        self.pool.free_singles_if_no_refs(&mut self.arena);
    }
}
