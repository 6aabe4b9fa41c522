//! The local TAC optimizer: sixteen ordered passes run to a fixed point (or
//! `max_optimizer_rounds`, whichever comes first) over a flat instruction
//! list, each pass a straightforward linear scan that resets its local maps
//! at a `BOUNDARIES` instruction (`Op::is_boundary`).
//!
//! Passes are free functions taking `&mut Vec<TacInstr>` and returning
//! whether they changed anything, mirroring `build_vcode.rs`'s lowering
//! passes (a flat sequence of `fn optimize_x(vcode: &mut VCode) -> bool`-
//! shaped rewrites run until none report progress). Running every pass to
//! a fixed point this way — rather than hand-ordering a single sufficient
//! pipeline — is what lets later passes expose rewrite opportunities
//! earlier ones missed on the first round (e.g. constant folding produces
//! a fresh dead temp that DCE only sees next round).

use hashbrown::HashMap;

use crate::config::CompilerOptions;
use crate::tac::{Literal, Op, Operand, TacInstr, TacProgram};

/// Runs every pass below in order, repeating the whole sequence until a
/// round makes no change or `max_optimizer_rounds` is hit.
pub fn optimize(prog: &mut TacProgram, opts: &CompilerOptions) {
  if !opts.optimize { return; }
  let mut round = 0;
  loop {
    let mut changed = false;
    changed |= validate_tac(&mut prog.instructions);
    changed |= constant_folding(&mut prog.instructions);
    changed |= enhanced_constant_folding(&mut prog.instructions, opts);
    changed |= constant_propagation(&mut prog.instructions);
    changed |= copy_propagation(&mut prog.instructions);
    changed |= algebraic_simplification(&mut prog.instructions);
    changed |= dead_code_elimination(&mut prog.instructions);
    changed |= remove_redundant_moves(&mut prog.instructions);
    changed |= remove_redundant_stores(&mut prog.instructions);
    changed |= strength_reduction(&mut prog.instructions);
    changed |= eliminate_copy_chains(&mut prog.instructions);
    changed |= remove_unused_constant_loads(&mut prog.instructions);
    changed |= optimize_memory_loads(&mut prog.instructions);
    changed |= remove_redundant_jumps(&mut prog.instructions);
    changed |= inline_single_use_temps(&mut prog.instructions);
    round += 1;
    log::debug!("optimizer round {round}: {} instructions, changed={changed}", prog.instructions.len());
    if !changed || round >= opts.max_optimizer_rounds { break; }
  }
  recolor_temps(prog);
}

/// Pass 1: `validate_tac` — drops instructions whose shape cannot be acted
/// on by any later pass (e.g. a binary op missing one of its operands, left
/// behind by a buggy partial rewrite). On well-formed input from `tacgen.rs`
/// this never fires; it exists so a later pass's rewrite mistake fails soft
/// instead of panicking the passes that follow.
fn validate_tac(instrs: &mut Vec<TacInstr>) -> bool {
  let before = instrs.len();
  instrs.retain(|i| match i.op {
    Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::And | Op::Or
    | Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::Eq | Op::Ne =>
      i.result.is_some() && i.arg1.is_some() && i.arg2.is_some(),
    Op::Neg | Op::Not | Op::Assign | Op::Deref =>
      i.result.is_some() && i.arg1.is_some(),
    _ => true,
  });
  instrs.len() != before
}

fn fold_binary(op: Op, a: i64, b: i64) -> Option<Literal> {
  match op {
    Op::Add => Some(Literal::Int(a.wrapping_add(b))),
    Op::Sub => Some(Literal::Int(a.wrapping_sub(b))),
    Op::Mul => Some(Literal::Int(a.wrapping_mul(b))),
    // Division/modulo by a constant zero is never folded: the MIPS
    // generator's runtime trap is the only place that behavior is
    // observable, and folding it away would hide the trap.
    Op::Div if b != 0 => Some(Literal::Int(a.div_euclid(b))),
    Op::Mod if b != 0 => Some(Literal::Int(a.rem_euclid(b))),
    Op::Lt => Some(Literal::Bool(a < b)),
    Op::Le => Some(Literal::Bool(a <= b)),
    Op::Gt => Some(Literal::Bool(a > b)),
    Op::Ge => Some(Literal::Bool(a >= b)),
    Op::Eq => Some(Literal::Bool(a == b)),
    Op::Ne => Some(Literal::Bool(a != b)),
    _ => None,
  }
}

/// Pass 2: `constant_folding` — `Add/Sub/Mul/Div/Mod/Lt/Le/Gt/Ge/Eq/Ne` with
/// two constant integer operands become `Assign result, <folded>`. Floor
/// semantics throughout.
fn constant_folding(instrs: &mut [TacInstr]) -> bool {
  let mut changed = false;
  for instr in instrs.iter_mut() {
    if let (Some(a), Some(b)) = (instr.arg1.as_ref().and_then(Operand::as_int), instr.arg2.as_ref().and_then(Operand::as_int)) {
      if let Some(folded) = fold_binary(instr.op, a, b) {
        let result = instr.result.take().expect("validated arithmetic op always has a result");
        *instr = TacInstr::new(Op::Assign).r(result).a1(Operand::Constant(folded));
        changed = true;
      }
    }
  }
  changed
}

/// Pass 3: `enhanced_constant_folding` — boolean `And/Or/Not` over constant
/// booleans, plus `Neg` of a constant integer.
fn enhanced_constant_folding(instrs: &mut [TacInstr], _opts: &CompilerOptions) -> bool {
  let mut changed = false;
  for instr in instrs.iter_mut() {
    let folded = match instr.op {
      Op::And => match (instr.arg1.as_ref().and_then(Operand::as_bool), instr.arg2.as_ref().and_then(Operand::as_bool)) {
        (Some(a), Some(b)) => Some(Literal::Bool(a && b)),
        _ => None,
      },
      Op::Or => match (instr.arg1.as_ref().and_then(Operand::as_bool), instr.arg2.as_ref().and_then(Operand::as_bool)) {
        (Some(a), Some(b)) => Some(Literal::Bool(a || b)),
        _ => None,
      },
      Op::Not => instr.arg1.as_ref().and_then(Operand::as_bool).map(|b| Literal::Bool(!b)),
      Op::Neg => instr.arg1.as_ref().and_then(Operand::as_int).map(|n| Literal::Int(-n)),
      _ => None,
    };
    if let Some(folded) = folded {
      let result = instr.result.take().expect("validated unary/binary op always has a result");
      *instr = TacInstr::new(Op::Assign).r(result).a1(Operand::Constant(folded));
      changed = true;
    }
  }
  changed
}

/// Pass 4: `constant_propagation` — within one boundary-delimited block,
/// once `Assign t, <const>` is seen, later reads of `t` (before it is
/// redefined or a boundary resets the map) are rewritten to the constant.
fn constant_propagation(instrs: &mut [TacInstr]) -> bool {
  let mut changed = false;
  let mut known: HashMap<Operand, Operand> = HashMap::new();
  for instr in instrs.iter_mut() {
    if instr.op.is_boundary() { known.clear(); }
    for slot in [&mut instr.arg1, &mut instr.arg2] {
      if let Some(op) = slot {
        if op.is_temp() {
          if let Some(replacement) = known.get(op) {
            *op = replacement.clone();
            changed = true;
          }
        }
      }
    }
    if instr.op == Op::Assign {
      if let (Some(dst), Some(src)) = (&instr.result, &instr.arg1) {
        if dst.is_temp() {
          if src.is_constant() { known.insert(dst.clone(), src.clone()); } else { known.remove(dst); }
        }
      }
    } else if let Some(dst) = instr.result.clone() {
      known.remove(&dst);
    }
  }
  changed
}

/// Pass 5: `copy_propagation` — same shape as constant propagation but for
/// `Assign t, s` where `s` is itself a temp (a pure register-to-register
/// copy), substituting `s` for later reads of `t`.
fn copy_propagation(instrs: &mut [TacInstr]) -> bool {
  let mut changed = false;
  let mut known: HashMap<Operand, Operand> = HashMap::new();
  for instr in instrs.iter_mut() {
    if instr.op.is_boundary() { known.clear(); }
    for slot in [&mut instr.arg1, &mut instr.arg2] {
      if let Some(op) = slot {
        if op.is_temp() {
          if let Some(replacement) = known.get(op) {
            *op = replacement.clone();
            changed = true;
          }
        }
      }
    }
    if instr.op == Op::Assign {
      if let (Some(dst), Some(src)) = (&instr.result, &instr.arg1) {
        if dst.is_temp() && src.is_temp() { known.insert(dst.clone(), src.clone()); } else if dst.is_temp() { known.remove(dst); }
      }
    } else if let Some(dst) = instr.result.clone() {
      known.remove(&dst);
    }
  }
  changed
}

/// Pass 6: `algebraic_simplification` — identities independent of the
/// operands' concrete values: `x + 0`, `0 + x`, `x - 0`, `x * 1`, `1 * x`,
/// `x * 0` -> `0`, `x / 1`, `x || false`, `x && true` and their mirrors.
fn algebraic_simplification(instrs: &mut [TacInstr]) -> bool {
  let mut changed = false;
  for instr in instrs.iter_mut() {
    let rewrite = match instr.op {
      Op::Add => match (instr.arg1.as_ref().and_then(Operand::as_int), instr.arg2.as_ref().and_then(Operand::as_int)) {
        (Some(0), _) => instr.arg2.clone(),
        (_, Some(0)) => instr.arg1.clone(),
        _ => None,
      },
      Op::Sub if instr.arg2.as_ref().and_then(Operand::as_int) == Some(0) => instr.arg1.clone(),
      Op::Mul => match (instr.arg1.as_ref().and_then(Operand::as_int), instr.arg2.as_ref().and_then(Operand::as_int)) {
        (Some(1), _) => instr.arg2.clone(),
        (_, Some(1)) => instr.arg1.clone(),
        (Some(0), _) | (_, Some(0)) => Some(Operand::int(0)),
        _ => None,
      },
      Op::Div if instr.arg2.as_ref().and_then(Operand::as_int) == Some(1) => instr.arg1.clone(),
      Op::Or => match (instr.arg1.as_ref().and_then(Operand::as_bool), instr.arg2.as_ref().and_then(Operand::as_bool)) {
        (Some(false), _) => instr.arg2.clone(),
        (_, Some(false)) => instr.arg1.clone(),
        (Some(true), _) | (_, Some(true)) => Some(Operand::boolean(true)),
        _ => None,
      },
      Op::And => match (instr.arg1.as_ref().and_then(Operand::as_bool), instr.arg2.as_ref().and_then(Operand::as_bool)) {
        (Some(true), _) => instr.arg2.clone(),
        (_, Some(true)) => instr.arg1.clone(),
        (Some(false), _) | (_, Some(false)) => Some(Operand::boolean(false)),
        _ => None,
      },
      _ => None,
    };
    if let Some(value) = rewrite {
      let result = instr.result.take().expect("validated arithmetic/logical op always has a result");
      *instr = TacInstr::new(Op::Assign).r(result).a1(value);
      changed = true;
    }
  }
  changed
}

/// Pass 7: `dead_code_elimination` — a `result`-producing instruction whose
/// `result` temp is never read anywhere in the program, and which has no
/// side effect (`Op::has_side_effect`), is dropped. Iterates to its own
/// local fixed point so dropping one dead instruction can expose another
/// (its sole operand's producer becoming dead in turn).
fn dead_code_elimination(instrs: &mut Vec<TacInstr>) -> bool {
  let mut changed = false;
  loop {
    let used: std::collections::HashSet<Operand> = instrs.iter().flat_map(TacInstr::uses).cloned().collect();
    let before = instrs.len();
    instrs.retain(|i| {
      if i.op.has_side_effect() { return true; }
      match &i.result {
        Some(r) if r.is_temp() => used.contains(r),
        _ => true,
      }
    });
    if instrs.len() == before { break; }
    changed = true;
  }
  changed
}

/// Pass 8: `remove_redundant_moves` — `Assign t, t` (a temp assigned to
/// itself; can appear after copy-chain collapsing) is dropped outright.
fn remove_redundant_moves(instrs: &mut Vec<TacInstr>) -> bool {
  let before = instrs.len();
  instrs.retain(|i| !(i.op == Op::Assign && i.result == i.arg1));
  instrs.len() != before
}

/// Pass 9: `remove_redundant_stores` — within one boundary-delimited block,
/// a second `Assign <same addr>, v` immediately following an identical
/// first one (no intervening read of that address) is redundant; drop the
/// earlier one. Only applies to memory destinations (`Global`/`FrameSlot`),
/// since a temp's "last write wins" case is already DCE's job.
fn remove_redundant_stores(instrs: &mut Vec<TacInstr>) -> bool {
  let mut keep = vec![true; instrs.len()];
  let mut last_store: HashMap<Operand, usize> = HashMap::new();
  for (idx, instr) in instrs.iter().enumerate() {
    if instr.op.is_boundary() { last_store.clear(); }
    if instr.op == Op::Assign {
      if let Some(dst) = &instr.result {
        if dst.is_memory() {
          if let Some(&prev_idx) = last_store.get(dst) {
            keep[prev_idx] = false;
          }
          last_store.insert(dst.clone(), idx);
          continue;
        }
      }
    }
    // any instruction that reads memory invalidates the "no intervening
    // read" assumption for every address it touches
    for used in instr.uses() {
      if used.is_memory() { last_store.remove(used); }
    }
  }
  let mut changed = false;
  let mut iter = keep.into_iter();
  instrs.retain(|_| {
    let k = iter.next().unwrap_or(true);
    changed |= !k;
    k
  });
  changed
}

/// Pass 10: `strength_reduction` — `x * 2^k` -> `x + x` (k=1) or left as a
/// multiply otherwise (no shift opcode exists in this closed TAC opcode
/// set); `x / 2^k`/`x % 2^k` are left to the MIPS generator, which already
/// emits the floor-correction sequence uniformly.
fn strength_reduction(instrs: &mut [TacInstr]) -> bool {
  let mut changed = false;
  for instr in instrs.iter_mut() {
    if instr.op == Op::Mul && instr.arg2.as_ref().and_then(Operand::as_int) == Some(2) {
      if let Some(lhs) = instr.arg1.clone() {
        let result = instr.result.clone().expect("validated Mul always has a result");
        *instr = TacInstr::new(Op::Add).r(result).a1(lhs.clone()).a2(lhs);
        changed = true;
      }
    }
  }
  changed
}

/// Pass 11: `eliminate_copy_chains` — `Assign t2, t1; Assign t3, t2` folds
/// to `Assign t3, t1` when `t2` is otherwise unused, collapsing multi-hop
/// copy chains constant/copy propagation alone can leave behind (those only
/// rewrite *reads*, not the redundant intermediate `Assign` itself — DCE
/// then removes it once its result is unused).
fn eliminate_copy_chains(instrs: &mut [TacInstr]) -> bool {
  let mut changed = false;
  let mut source_of: HashMap<Operand, Operand> = HashMap::new();
  for instr in instrs.iter_mut() {
    if instr.op.is_boundary() { source_of.clear(); }
    if instr.op == Op::Assign {
      if let Some(src) = instr.arg1.clone() {
        if let Some(original) = source_of.get(&src).cloned() {
          instr.arg1 = Some(original.clone());
          changed = true;
        }
        if let Some(dst) = &instr.result {
          if dst.is_temp() {
            source_of.insert(dst.clone(), instr.arg1.clone().expect("just set"));
          }
        }
      }
    } else if let Some(dst) = instr.result.clone() {
      source_of.remove(&dst);
    }
  }
  changed
}

/// Pass 12: `remove_unused_constant_loads` — `Assign t, <const>` where `t`
/// is never subsequently read is dead; this is a narrower, cheaper special
/// case of full DCE run between rounds so an obviously-dead load doesn't
/// survive to confuse `optimize_memory_loads`' view of live temps.
fn remove_unused_constant_loads(instrs: &mut Vec<TacInstr>) -> bool {
  let used: std::collections::HashSet<Operand> = instrs.iter().flat_map(TacInstr::uses).cloned().collect();
  let before = instrs.len();
  instrs.retain(|i| {
    !(i.op == Op::Assign
      && i.arg1.as_ref().is_some_and(Operand::is_constant)
      && i.result.as_ref().is_some_and(|r| r.is_temp() && !used.contains(r)))
  });
  instrs.len() != before
}

/// Pass 13: `optimize_memory_loads` — two consecutive `Deref dst1, addr`
/// `Deref dst2, addr` with no intervening write to `addr` collapse to one
/// `Deref` plus a copy, since the second load is guaranteed to read the
/// value the first one already materialized.
fn optimize_memory_loads(instrs: &mut [TacInstr]) -> bool {
  let mut changed = false;
  let mut last_load: HashMap<Operand, Operand> = HashMap::new();
  for instr in instrs.iter_mut() {
    if instr.op.is_boundary() { last_load.clear(); }
    match instr.op {
      Op::Deref => {
        let addr = instr.arg1.clone().expect("validated Deref always has arg1");
        if let Some(prior_dst) = last_load.get(&addr).cloned() {
          let dst = instr.result.clone().expect("validated Deref always has a result");
          *instr = TacInstr::new(Op::Assign).r(dst.clone()).a1(prior_dst);
          last_load.insert(addr, dst);
          changed = true;
        } else if let Some(dst) = &instr.result {
          last_load.insert(addr, dst.clone());
        }
      }
      Op::Assign => {
        if let Some(dst) = &instr.result {
          if dst.is_memory() { last_load.remove(dst); }
        }
      }
      _ => {
        if let Some(dst) = &instr.result {
          if dst.is_memory() { last_load.remove(dst); }
        }
      }
    }
  }
  changed
}

/// Pass 14: `remove_redundant_jumps` — an unconditional `Goto L` whose
/// target label immediately follows it (nothing, or only other labels, in
/// between) is dropped; a `Label` with no remaining `Goto`/`IfTrue`/
/// `IfFalse` referencing it is likewise dropped (fallthrough already reaches
/// the code after it).
fn remove_redundant_jumps(instrs: &mut Vec<TacInstr>) -> bool {
  let mut changed = false;

  // GOTO immediately followed (modulo intervening labels) by its own target.
  let mut drop = vec![false; instrs.len()];
  for (idx, instr) in instrs.iter().enumerate() {
    if instr.op != Op::Goto { continue; }
    let Some(target) = instr.arg1.as_ref().and_then(Operand::as_label) else { continue };
    let mut j = idx + 1;
    while j < instrs.len() && instrs[j].op == Op::Label && instrs[j].result.as_ref().and_then(Operand::as_label) != Some(target) {
      j += 1;
    }
    if j < instrs.len() && instrs[j].op == Op::Label && instrs[j].result.as_ref().and_then(Operand::as_label) == Some(target) {
      drop[idx] = true;
    }
  }
  if drop.iter().any(|&d| d) {
    changed = true;
    let mut iter = drop.into_iter();
    instrs.retain(|_| !iter.next().unwrap_or(false));
  }

  // Labels no jump references anymore.
  let referenced: std::collections::HashSet<_> = instrs.iter()
    .filter(|i| matches!(i.op, Op::Goto | Op::IfTrue | Op::IfFalse))
    .filter_map(|i| i.arg1.as_ref().and_then(Operand::as_label).or_else(|| i.arg2.as_ref().and_then(Operand::as_label)))
    .collect();
  let before = instrs.len();
  instrs.retain(|i| {
    i.op != Op::Label || match i.result.as_ref().and_then(Operand::as_label) {
      Some(l) => referenced.contains(&l),
      None => true,
    }
  });
  changed |= instrs.len() != before;
  changed
}

/// Pass 15: `inline_single_use_temps` — a liveness-adjacent pass: if a temp
/// is defined exactly once and read exactly once, and no boundary
/// instruction separates the definition from that single use, the
/// definition's right-hand side is substituted directly at the use site and
/// the definition dropped ("load forwarding" in `build_vcode.rs`'s
/// vocabulary for the equivalent peephole).
fn inline_single_use_temps(instrs: &mut Vec<TacInstr>) -> bool {
  let def_count = count_operand_roles(instrs, true);
  let use_count = count_operand_roles(instrs, false);

  let mut forwardable: HashMap<Operand, Operand> = HashMap::new();
  for (idx, instr) in instrs.iter().enumerate() {
    if instr.op != Op::Assign { continue; }
    let (Some(dst), Some(src)) = (&instr.result, &instr.arg1) else { continue };
    if !dst.is_temp() { continue; }
    if def_count.get(dst).copied().unwrap_or(0) != 1 || use_count.get(dst).copied().unwrap_or(0) != 1 { continue; }
    // no boundary between this definition and the (unique) use
    let mut j = idx + 1;
    let mut blocked = false;
    while j < instrs.len() {
      if instrs[j].uses().any(|u| u == dst) { break; }
      if instrs[j].op.is_boundary() { blocked = true; break; }
      j += 1;
    }
    if !blocked && j < instrs.len() {
      forwardable.insert(dst.clone(), src.clone());
    }
  }
  if forwardable.is_empty() { return false; }

  let mut changed = false;
  for instr in instrs.iter_mut() {
    for slot in [&mut instr.arg1, &mut instr.arg2] {
      if let Some(op) = slot {
        if let Some(replacement) = forwardable.get(op) {
          *op = replacement.clone();
          changed = true;
        }
      }
    }
  }
  if changed {
    instrs.retain(|i| {
      !(i.op == Op::Assign && i.result.as_ref().is_some_and(|r| forwardable.contains_key(r)))
    });
  }
  changed
}

fn count_operand_roles(instrs: &[TacInstr], defs: bool) -> HashMap<Operand, u32> {
  let mut counts = HashMap::new();
  for instr in instrs {
    let iter: Box<dyn Iterator<Item = &Operand>> = if defs {
      Box::new(instr.result.iter().filter(|r| r.is_temp()))
    } else {
      Box::new(instr.uses().filter(|u| u.is_temp()))
    };
    for op in iter { *counts.entry(op.clone()).or_insert(0) += 1; }
  }
  counts
}

/// Pass 16: `recolor_temps` — the final renumbering that minimizes temporary
/// count by assigning a color to each temporary such that two interfering
/// temporaries receive distinct colors. Builds a liveness range per temp
/// (its first definition to its last use, as instruction indices over the
/// whole program — this pass, unlike the per-block passes above, runs once
/// globally after they've converged), an interference graph from
/// overlapping ranges, sorts temps by degree (ties broken by
/// first-definition index), and greedily assigns each the lowest color none
/// of its already-colored neighbors holds. `bit-set`'s `BitSet` is the
/// natural representation for both a temp's neighbor set and the "colors
/// taken by already-colored neighbors" query the greedy step makes once per
/// temp.
fn recolor_temps(prog: &mut TacProgram) {
  use crate::tac::TempId;
  use bit_set::BitSet;

  // Collect each temp's first-definition and last-use instruction index,
  // and its dense appearance order (used only to index into `ranges`).
  let mut order: Vec<TempId> = Vec::new();
  let mut dense: HashMap<TempId, usize> = HashMap::new();
  let mut first_def: Vec<usize> = Vec::new();
  let mut last_use: Vec<usize> = Vec::new();
  for (idx, instr) in prog.instructions.iter().enumerate() {
    for operand in instr.operands() {
      if let Operand::Temp(t) = operand {
        let i = *dense.entry(*t).or_insert_with(|| {
          order.push(*t);
          first_def.push(idx);
          last_use.push(idx);
          order.len() - 1
        });
        if idx < first_def[i] { first_def[i] = idx; }
        if idx > last_use[i] { last_use[i] = idx; }
      }
    }
  }
  let n = order.len();
  if n == 0 { return; }

  // Interference graph: temp `i` and `j` interfere iff their [first_def,
  // last_use] ranges overlap.
  let mut graph: Vec<BitSet> = vec![BitSet::with_capacity(n); n];
  for i in 0..n {
    for j in (i + 1)..n {
      let overlap = first_def[i] <= last_use[j] && first_def[j] <= last_use[i];
      if overlap {
        graph[i].insert(j);
        graph[j].insert(i);
      }
    }
  }

  // Sort by descending degree, ties by ascending first_def.
  let mut by_degree: Vec<usize> = (0..n).collect();
  by_degree.sort_by(|&a, &b| graph[b].len().cmp(&graph[a].len()).then(first_def[a].cmp(&first_def[b])));

  let mut color_of: Vec<Option<u32>> = vec![None; n];
  for &t in &by_degree {
    let mut used = BitSet::with_capacity(n);
    for neighbor in graph[t].iter() {
      if let Some(c) = color_of[neighbor] { used.insert(c as usize); }
    }
    let mut color = 0u32;
    while used.contains(color as usize) { color += 1; }
    color_of[t] = Some(color);
  }

  let mapping: HashMap<TempId, TempId> = order.iter().enumerate()
    .map(|(i, &t)| (t, TempId(color_of[i].expect("every temp colored above"))))
    .collect();
  let next = color_of.iter().map(|c| c.expect("every temp colored above")).max().map_or(0, |m| m + 1);

  for instr in prog.instructions.iter_mut() {
    for operand in instr.operands_mut() {
      if let Operand::Temp(t) = operand {
        if let Some(&new_id) = mapping.get(t) { *t = new_id; }
      }
    }
  }
  prog.set_temp_counter(next);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tac::TempId;

  fn opts() -> CompilerOptions { CompilerOptions::default() }

  #[test]
  fn constant_folding_reduces_arithmetic() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    prog.emit(TacInstr::new(Op::Add).r(Operand::Temp(t0)).a1(Operand::int(2)).a2(Operand::int(3)));
    optimize(&mut prog, &opts());
    assert_eq!(prog.instructions.len(), 0, "dead constant load should be eliminated entirely");
  }

  #[test]
  fn floor_division_matches_euclidean_semantics_for_negative_operands() {
    assert_eq!(fold_binary(Op::Div, -7, 2), Some(Literal::Int(-4)));
    assert_eq!(fold_binary(Op::Mod, -7, 2), Some(Literal::Int(1)));
  }

  #[test]
  fn division_by_constant_zero_is_never_folded() {
    assert_eq!(fold_binary(Op::Div, 1, 0), None);
  }

  #[test]
  fn dead_code_elimination_preserves_print_operand_sequence() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    prog.emit(TacInstr::new(Op::Assign).r(Operand::Temp(t0)).a1(Operand::int(5)));
    prog.emit(TacInstr::new(Op::Print).a1(Operand::Temp(t0)));
    let opts = opts();
    optimize(&mut prog, &opts);
    assert!(prog.instructions.iter().any(|i| i.op == Op::Print));
  }

  #[test]
  fn algebraic_simplification_drops_add_zero() {
    let mut instrs = vec![
      TacInstr::new(Op::Add).r(Operand::Temp(TempId(0))).a1(Operand::Temp(TempId(1))).a2(Operand::int(0)),
    ];
    algebraic_simplification(&mut instrs);
    assert_eq!(instrs[0].op, Op::Assign);
    assert_eq!(instrs[0].arg1, Some(Operand::Temp(TempId(1))));
  }

  #[test]
  fn redundant_goto_to_following_label_is_removed() {
    let mut instrs = vec![
      TacInstr::new(Op::Goto).a1(Operand::Label(crate::tac::LabelId(0))),
      TacInstr::new(Op::Label).r(Operand::Label(crate::tac::LabelId(0))),
    ];
    remove_redundant_jumps(&mut instrs);
    assert!(instrs.iter().all(|i| i.op != Op::Goto));
  }

  #[test]
  fn temp_numbering_is_dense_after_recoloring() {
    let mut prog = TacProgram::new();
    let t0 = prog.new_temp();
    let t1 = prog.new_temp();
    prog.free_if_temp(&Operand::Temp(t0));
    let t2 = prog.new_temp(); // reuses t0's slot, so raw indices are {0, 1}... already dense here;
    prog.emit(TacInstr::new(Op::Add).r(Operand::Temp(t2)).a1(Operand::Temp(t1)).a2(Operand::int(1)));
    prog.emit(TacInstr::new(Op::Print).a1(Operand::Temp(t2)));
    optimize(&mut prog, &opts());
    let used: std::collections::HashSet<u32> = prog.instructions.iter()
      .flat_map(TacInstr::operands)
      .filter_map(|o| if let Operand::Temp(t) = o { Some(t.0) } else { None })
      .collect();
    let mut sorted: Vec<u32> = used.into_iter().collect();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..sorted.len() as u32).collect::<Vec<_>>());
  }
}
