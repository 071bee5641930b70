//! Property tests for the symbolic operand stack and straight-line lowering

use basalt_bytecode::{AtomTable, Opcode, ProgramBuilder, Value};
use basalt_jit::frame::FrameInfo;
use basalt_jit::masm::{MacroAssembler, ValueReg};
use basalt_jit::{BaselineJit, GlobalHost, JitConfig, Machine, MethodStatus, Script};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum FrameStep {
    Constant(i32),
    Local(u32),
    Register(u8),
    Pop,
    Use(u32),
    Sync(u32),
}

fn frame_step() -> impl Strategy<Value = FrameStep> {
    prop_oneof![
        any::<i32>().prop_map(FrameStep::Constant),
        (0u32..4).prop_map(FrameStep::Local),
        (0u8..3).prop_map(FrameStep::Register),
        Just(FrameStep::Pop),
        (1u32..=2).prop_map(FrameStep::Use),
        (0u32..4).prop_map(FrameStep::Sync),
    ]
}

fn register(n: u8) -> ValueReg {
    match n {
        0 => ValueReg::R0,
        1 => ValueReg::R1,
        _ => ValueReg::R2,
    }
}

#[derive(Debug, Clone)]
enum ExprStep {
    Push(i8),
    Add,
    Sub,
    Dup,
    Swap,
    Pop,
}

fn expr_step() -> impl Strategy<Value = ExprStep> {
    prop_oneof![
        3 => any::<i8>().prop_map(ExprStep::Push),
        2 => Just(ExprStep::Add),
        2 => Just(ExprStep::Sub),
        1 => Just(ExprStep::Dup),
        1 => Just(ExprStep::Swap),
        1 => Just(ExprStep::Pop),
    ]
}

/// Emit the valid prefix-closed subsequence of `steps` and evaluate it
fn build_expr(steps: &[ExprStep]) -> (ProgramBuilder, f64) {
    let mut b = ProgramBuilder::new("expr");
    let mut model: Vec<f64> = Vec::new();

    for step in steps {
        match *step {
            ExprStep::Push(v) => {
                b.int(v as i32);
                model.push(v as f64);
            }
            ExprStep::Add | ExprStep::Sub if model.len() >= 2 => {
                let rhs = model.pop().unwrap_or_default();
                let lhs = model.pop().unwrap_or_default();
                if matches!(step, ExprStep::Add) {
                    b.op(Opcode::Add);
                    model.push(lhs + rhs);
                } else {
                    b.op(Opcode::Sub);
                    model.push(lhs - rhs);
                }
            }
            ExprStep::Dup if !model.is_empty() => {
                b.op(Opcode::Dup);
                let top = model[model.len() - 1];
                model.push(top);
            }
            ExprStep::Swap if model.len() >= 2 => {
                b.op(Opcode::Swap);
                let n = model.len();
                model.swap(n - 1, n - 2);
            }
            ExprStep::Pop if !model.is_empty() => {
                b.op(Opcode::Pop);
                model.pop();
            }
            _ => {}
        }
    }

    if model.is_empty() {
        b.op(Opcode::One);
        model.push(1.0);
    }
    while model.len() > 1 {
        b.op(Opcode::Add);
        let rhs = model.pop().unwrap_or_default();
        let lhs = model.pop().unwrap_or_default();
        model.push(lhs + rhs);
    }
    b.op(Opcode::Return);
    (b, model[0])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_machine_height_tracks_spilled_entries(
        steps in prop::collection::vec(frame_step(), 0..64)
    ) {
        let mut frame = FrameInfo::new(4, 0);
        let mut masm = MacroAssembler::new();

        for step in &steps {
            match *step {
                FrameStep::Constant(v) => frame.push_constant(Value::int32(v)),
                FrameStep::Local(slot) => frame.push_local(slot),
                FrameStep::Register(r) => frame.push_reg(&mut masm, register(r)),
                FrameStep::Pop if frame.stack_depth() > 0 => frame.pop(&mut masm),
                FrameStep::Use(n) if frame.stack_depth() >= n => {
                    frame.pop_regs_and_sync(&mut masm, n);
                    frame.push_reg(&mut masm, ValueReg::R0);
                }
                FrameStep::Sync(keep) => frame.sync_stack(&mut masm, keep),
                _ => {}
            }
            frame.assert_valid_state();
            prop_assert_eq!(masm.frame_pushed(), frame.spilled_count());
        }

        frame.sync_stack(&mut masm, 0);
        prop_assert_eq!(masm.frame_pushed(), frame.stack_depth());
        prop_assert_eq!(frame.spilled_count(), frame.stack_depth());
    }

    #[test]
    fn prop_straight_line_code_matches_model(
        steps in prop::collection::vec(expr_step(), 1..48),
        debug_mode in any::<bool>(),
    ) {
        let (builder, expected) = build_expr(&steps);

        let atoms = Arc::new(AtomTable::new());
        let config = JitConfig { debug_mode, ..Default::default() };
        let jit = BaselineJit::new(config.clone(), atoms.clone());
        let script = Script::new(builder.build(&atoms).unwrap());
        prop_assert_eq!(jit.compile(&script), MethodStatus::Compiled);

        let host = GlobalHost::new(atoms.clone());
        let mut vm = Machine::new(Box::new(host), atoms, &config);
        prop_assert_eq!(vm.execute(&script, &[]), Ok(Value::number(expected)));
        prop_assert!(vm.stack().is_empty());
    }
}
