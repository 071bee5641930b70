//! End-to-end baseline compilation tests.
//!
//! Builds bytecode programs, compiles them through `BaselineJit`, and runs
//! the installed code on a `Machine` backed by a `GlobalHost`.
//! Organized in 4 categories:
//! 1. Compile outcomes and IC allocation
//! 2. Execution: arithmetic, locals, stack shuffles
//! 3. Execution: control flow and merges
//! 4. Execution: names, properties, calls

use basalt_bytecode::{AtomTable, BytecodeProgram, Opcode, ProgramBuilder, Value};
use basalt_jit::masm::{Address, Inst, ValueReg};
use basalt_jit::{
    Bailout, BaselineJit, CompileError, FallbackFactory, GlobalHost, Host, IcFrame, IcIndex,
    IcKind, JitConfig, LinkError, Machine, MethodStatus, Script, StubCode, StubKind, StubResult,
    VmError,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    });
}

struct Env {
    atoms: Arc<AtomTable>,
    config: JitConfig,
    jit: BaselineJit,
}

impl Env {
    fn new() -> Self {
        Self::with_config(JitConfig::default())
    }

    fn with_config(config: JitConfig) -> Self {
        init_tracing();
        let atoms = Arc::new(AtomTable::new());
        let jit = BaselineJit::new(config.clone(), atoms.clone());
        Env { atoms, config, jit }
    }

    fn script(&self, builder: ProgramBuilder) -> Script {
        Script::new(self.program(builder))
    }

    fn program(&self, builder: ProgramBuilder) -> BytecodeProgram {
        builder.build(&self.atoms).unwrap()
    }

    fn host(&self) -> GlobalHost {
        GlobalHost::new(self.atoms.clone())
    }

    fn machine(&self, host: GlobalHost) -> Machine {
        Machine::new(Box::new(host), self.atoms.clone(), &self.config)
    }

    /// Compile and run with a fresh host
    fn run(&self, builder: ProgramBuilder, args: &[Value]) -> Result<Value, VmError> {
        let script = self.script(builder);
        assert_eq!(self.jit.compile(&script), MethodStatus::Compiled);
        self.machine(self.host()).execute(&script, args)
    }

    fn string(&self, text: &str) -> Value {
        Value::string(self.atoms.intern(text))
    }
}

/// `[push 1, push 2, add, return]`
fn one_plus_two() -> ProgramBuilder {
    let mut b = ProgramBuilder::new("one_plus_two");
    b.int(1).int(2).op(Opcode::Add).op(Opcode::Return);
    b
}

/// `[cond, ifeq L1, push 10, goto L2, L1: push 20, L2: return]`
fn diamond(cond: impl FnOnce(&mut ProgramBuilder)) -> ProgramBuilder {
    let mut b = ProgramBuilder::new("diamond").args(1);
    cond(&mut b);
    let to_l1 = b.jump(Opcode::IfEq);
    b.int(10);
    let to_l2 = b.jump(Opcode::Goto);
    b.bind(to_l1);
    b.int(20);
    b.bind(to_l2);
    b.op(Opcode::Return);
    b
}

/// Sum of 1..=10 with a counted loop over two locals
fn sum_loop() -> ProgramBuilder {
    let mut b = ProgramBuilder::new("sum_loop").slots(2);
    b.op(Opcode::Zero)
        .op_u16(Opcode::SetLocal, 0)
        .op(Opcode::Pop)
        .op(Opcode::Zero)
        .op_u16(Opcode::SetLocal, 1)
        .op(Opcode::Pop);
    let top = b.offset();
    b.op(Opcode::LoopHead)
        .op_u16(Opcode::GetLocal, 0)
        .int(10)
        .op(Opcode::Lt);
    let exit = b.jump(Opcode::IfEq);
    b.op_u16(Opcode::GetLocal, 1)
        .op_u16(Opcode::IncLocal, 0)
        .op(Opcode::Add)
        .op_u16(Opcode::SetLocal, 1)
        .op(Opcode::Pop)
        .jump_to(Opcode::Goto, top);
    b.bind(exit);
    b.op_u16(Opcode::GetLocal, 1).op(Opcode::Return);
    b
}

/// Fallback factory that refuses its `fail_at`-th request
struct FailingFactory {
    fail_at: usize,
    calls: AtomicUsize,
}

impl FallbackFactory for FailingFactory {
    fn create(&self, kind: &IcKind) -> Option<StubCode> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if n == self.fail_at {
            return None;
        }
        basalt_jit::DefaultFallbacks.create(kind)
    }
}

// ============================================================================
// 1. Compile outcomes and IC allocation
// ============================================================================

#[test]
fn test_scenario_a_single_ic_site() {
    let env = Env::new();
    let script = env.script(one_plus_two());

    let method = env.jit.try_compile(&script).unwrap();
    assert_eq!(method.ic_entries().len(), 1);
    assert_eq!(method.ic_entries()[0].kind, IcKind::BinaryArith(Opcode::Add));
    assert!(script.has_baseline());

    let mut vm = env.machine(env.host());
    assert_eq!(vm.execute(&script, &[]), Ok(Value::int32(3)));
    assert!(vm.stack().is_empty());
}

#[test]
fn test_scenario_c_unhandled_opcode() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("throws");
    b.op(Opcode::One).op(Opcode::Throw);
    let script = env.script(b);

    let err = env.jit.try_compile(&script).unwrap_err();
    assert!(matches!(
        err,
        CompileError::CantCompile(Bailout::UnsupportedOpcode {
            opcode: Opcode::Throw,
            offset: 1
        })
    ));
    assert_eq!(env.jit.compile(&script), MethodStatus::CantCompile);
    assert!(!script.has_baseline());
}

#[test]
fn test_arguments_object_cant_compile() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("uses_arguments");
    b.op(Opcode::Arguments).op(Opcode::Return);
    let script = env.script(b);

    assert_eq!(env.jit.compile(&script), MethodStatus::CantCompile);
    assert!(!script.has_baseline());
}

#[test]
fn test_scenario_d_failing_ic_allocation() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("three_adds").args(1);
    b.op_u16(Opcode::GetArg, 0)
        .op_u16(Opcode::GetArg, 0)
        .op(Opcode::Add)
        .op_u16(Opcode::GetArg, 0)
        .op(Opcode::Add)
        .op_u16(Opcode::GetArg, 0)
        .op(Opcode::Add)
        .op(Opcode::Return);
    let script = env.script(b);

    let factory = Arc::new(FailingFactory {
        fail_at: 3,
        calls: AtomicUsize::new(0),
    });
    let jit = BaselineJit::new(JitConfig::default(), env.atoms.clone()).with_fallbacks(factory);
    let err = jit.try_compile(&script).unwrap_err();
    assert!(matches!(err, CompileError::FallbackUnavailable(ref k) if k == "BinaryArith(ADD)"));
    assert_eq!(err.status(), MethodStatus::Error);
    assert!(!script.has_baseline());
}

#[test]
fn test_ic_table_limit_is_error() {
    let config = JitConfig {
        max_ic_entries: 1,
        ..Default::default()
    };
    let env = Env::with_config(config);
    let mut b = ProgramBuilder::new("two_sites").args(1);
    b.op_u16(Opcode::GetArg, 0)
        .op(Opcode::Neg)
        .op(Opcode::BitNot)
        .op(Opcode::Return);
    let script = env.script(b);

    assert!(matches!(
        env.jit.try_compile(&script),
        Err(CompileError::IcTableFull { limit: 1 })
    ));
    assert!(!script.has_baseline());
}

#[test]
fn test_failure_keeps_prior_baseline() {
    let env = Env::new();
    let script = env.script(one_plus_two());
    let first = env.jit.try_compile(&script).unwrap();

    let tiny = JitConfig {
        code_pool_limit: 3,
        ..Default::default()
    };
    let starved = BaselineJit::new(tiny, env.atoms.clone());
    let err = starved.try_compile(&script).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Link(LinkError::PoolExhausted { available: 3, .. })
    ));

    let installed = script.baseline().unwrap();
    assert!(Arc::ptr_eq(&first, &installed));
}

#[test]
fn test_ic_entries_in_program_order() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("mixed").args(2);
    b.op_u16(Opcode::GetArg, 0)
        .op_u16(Opcode::GetArg, 1)
        .op(Opcode::Mul)
        .op_atom(Opcode::GetGlobal, "k")
        .op(Opcode::StrictEq)
        .op(Opcode::Not)
        .op(Opcode::Neg)
        .op(Opcode::Return);
    let script = env.script(b);
    let method = env.jit.try_compile(&script).unwrap();

    let k = env.atoms.intern("k");
    let kinds: Vec<_> = method.ic_entries().iter().map(|e| e.kind).collect();
    // Not on a comparison result needs no conversion site
    assert_eq!(
        kinds,
        vec![
            IcKind::BinaryArith(Opcode::Mul),
            IcKind::GetGlobal(k),
            IcKind::Compare(Opcode::StrictEq),
            IcKind::Unary(Opcode::Neg),
        ]
    );
    let pcs: Vec<_> = method.ic_entries().iter().map(|e| e.pc_offset).collect();
    assert!(pcs.windows(2).all(|w| w[0] < w[1]));

    // Every entry's return offset follows its call
    for entry in method.ic_entries() {
        let call = method.code().inst(entry.return_offset - 1).unwrap();
        assert!(matches!(call, Inst::CallIc { .. }));
    }
}

#[test]
fn test_compile_is_idempotent() {
    let env = Env::new();
    let script = env.script(sum_loop());

    let first = env.jit.try_compile(&script).unwrap();
    let second = env.jit.try_compile(&script).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &script.baseline().unwrap()));

    let shape = |m: &basalt_jit::CompiledMethod| {
        m.ic_entries()
            .iter()
            .map(|e| (e.pc_offset, e.kind))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&*first), shape(&*second));
    assert_eq!(first.code().insts(), second.code().insts());

    let mut b = ProgramBuilder::new("throws");
    b.op(Opcode::Undefined).op(Opcode::Throw);
    let bad = env.script(b);
    assert_eq!(env.jit.compile(&bad), env.jit.compile(&bad));
}

#[test]
fn test_unreachable_code_is_skipped() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("dead");
    let over = b.jump(Opcode::Goto);
    // Never reached, so the unsupported opcode does not matter
    b.op(Opcode::Debugger);
    b.bind(over);
    b.int(4).op(Opcode::Return);

    assert_eq!(env.run(b, &[]), Ok(Value::int32(4)));
}

// ============================================================================
// 2. Execution: arithmetic, locals, stack shuffles
// ============================================================================

#[test]
fn test_scenario_e_write_then_read_local() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("write_read").slots(1);
    b.int(42)
        .op_u16(Opcode::SetLocal, 0)
        .op(Opcode::Pop)
        .op_u16(Opcode::GetLocal, 0)
        .op(Opcode::Return);
    assert_eq!(env.run(b, &[]), Ok(Value::int32(42)));
}

#[test]
fn test_pending_read_survives_overwrite() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("stale").slots(1);
    b.int(1)
        .op_u16(Opcode::SetLocal, 0)
        .op(Opcode::Pop)
        .op_u16(Opcode::GetLocal, 0)
        .int(2)
        .op_u16(Opcode::SetLocal, 0)
        .op(Opcode::Pop)
        .op(Opcode::Return);
    assert_eq!(env.run(b, &[]), Ok(Value::int32(1)));
}

#[test]
fn test_increment_local() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("inc").slots(1);
    b.int(41)
        .op_u16(Opcode::SetLocal, 0)
        .op(Opcode::Pop)
        .op_u16(Opcode::GetLocal, 0)
        .op(Opcode::One)
        .op(Opcode::Add)
        .op_u16(Opcode::SetLocal, 0)
        .op(Opcode::Pop)
        .op_u16(Opcode::DecLocal, 0)
        .op_u16(Opcode::IncLocal, 0)
        .op(Opcode::Add)
        .op(Opcode::Return);
    // (42 - 1) + (41 + 1)
    assert_eq!(env.run(b, &[]), Ok(Value::int32(83)));
}

#[test]
fn test_stack_shuffles() {
    let env = Env::new();

    let mut dup = ProgramBuilder::new("dup");
    dup.int(3).op(Opcode::Dup).op(Opcode::Mul).op(Opcode::Return);
    assert_eq!(env.run(dup, &[]), Ok(Value::int32(9)));

    let mut swap = ProgramBuilder::new("swap");
    swap.int(10).int(4).op(Opcode::Swap).op(Opcode::Sub).op(Opcode::Return);
    assert_eq!(env.run(swap, &[]), Ok(Value::int32(-6)));

    let mut dup2 = ProgramBuilder::new("dup2");
    dup2.int(1)
        .int(2)
        .op(Opcode::Dup2)
        .op(Opcode::Add)
        .op(Opcode::Add)
        .op(Opcode::Add)
        .op(Opcode::Return);
    assert_eq!(env.run(dup2, &[]), Ok(Value::int32(6)));

    let mut popn = ProgramBuilder::new("popn");
    popn.int(7)
        .int(8)
        .int(9)
        .op_u16(Opcode::PopN, 2)
        .op(Opcode::Return);
    assert_eq!(env.run(popn, &[]), Ok(Value::int32(7)));
}

#[test]
fn test_deep_operand_stack() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("deep");
    for i in 1..=8 {
        b.int(i);
    }
    for _ in 1..8 {
        b.op(Opcode::Add);
    }
    b.op(Opcode::Return);
    assert_eq!(env.run(b, &[]), Ok(Value::int32(36)));
}

#[test]
fn test_unary_operators() {
    let env = Env::new();

    let neg = |v: Value| {
        let mut b = ProgramBuilder::new("neg").args(1);
        b.op_u16(Opcode::GetArg, 0).op(Opcode::Neg).op(Opcode::Return);
        env.run(b, &[v])
    };
    assert_eq!(neg(Value::int32(5)), Ok(Value::int32(-5)));

    let pos = |v: Value| {
        let mut b = ProgramBuilder::new("pos").args(1);
        b.op_u16(Opcode::GetArg, 0).op(Opcode::Pos).op(Opcode::Return);
        env.run(b, &[v])
    };
    assert_eq!(pos(Value::int32(5)), Ok(Value::int32(5)));
    assert_eq!(pos(env.string("12")), Ok(Value::int32(12)));
    assert_eq!(pos(Value::bool(true)), Ok(Value::int32(1)));

    let not = |v: Value| {
        let mut b = ProgramBuilder::new("not").args(1);
        b.op_u16(Opcode::GetArg, 0).op(Opcode::Not).op(Opcode::Return);
        env.run(b, &[v])
    };
    assert_eq!(not(Value::int32(0)), Ok(Value::bool(true)));
    assert_eq!(not(env.string("x")), Ok(Value::bool(false)));
}

#[test]
fn test_string_concatenation() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("concat");
    b.string("basalt-").int(7).op(Opcode::Add).op(Opcode::Return);
    assert_eq!(env.run(b, &[]), Ok(env.string("basalt-7")));
}

#[test]
fn test_missing_arguments_are_undefined() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("missing").args(2);
    b.op_u16(Opcode::GetArg, 1).op(Opcode::Return);
    assert_eq!(env.run(b, &[Value::int32(1)]), Ok(Value::undefined()));
}

#[test]
fn test_set_arg() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("set_arg").args(1);
    b.int(5)
        .op_u16(Opcode::SetArg, 0)
        .op(Opcode::Pop)
        .op_u16(Opcode::GetArg, 0)
        .op_u16(Opcode::GetArg, 0)
        .op(Opcode::Mul)
        .op(Opcode::Return);
    assert_eq!(env.run(b, &[Value::int32(2)]), Ok(Value::int32(25)));
}

#[test]
fn test_local_index_past_slots_reads_operand_stack() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("window").slots(1);
    // Slot 2 is the second operand stack entry: the pushed 9
    b.int(5)
        .int(9)
        .op_u16(Opcode::GetLocal, 2)
        .op(Opcode::Add)
        .op(Opcode::Add)
        .op(Opcode::Return);
    let script = env.script(b);
    let method = env.jit.try_compile(&script).unwrap();
    assert!(method
        .code()
        .insts()
        .iter()
        .any(|inst| matches!(inst, Inst::Load { src: Address::Local(2), .. })));

    let mut vm = env.machine(env.host());
    assert_eq!(vm.execute(&script, &[]), Ok(Value::int32(23)));
    assert!(vm.stack().is_empty());
}

// ============================================================================
// 3. Execution: control flow and merges
// ============================================================================

#[test]
fn test_scenario_b_branch_merge() {
    let env = Env::new();

    let not_taken = env.script(diamond(|b| {
        b.op(Opcode::True);
    }));
    let method = env.jit.try_compile(&not_taken).unwrap();
    // Known boolean condition: no conversion site
    assert!(method.ic_entries().is_empty());

    // Both predecessors flush their value before reaching L2
    let insts = method.code().insts();
    let goto = insts
        .iter()
        .position(|i| matches!(i, Inst::Jump(_)))
        .unwrap();
    assert_eq!(insts[goto - 1], Inst::PushImm(Value::int32(10)));
    let Inst::Jump(l2) = insts[goto] else { unreachable!() };
    assert_eq!(insts[l2 as usize - 1], Inst::PushImm(Value::int32(20)));
    assert_eq!(insts[l2 as usize], Inst::Pop(ValueReg::R0));

    let mut vm = env.machine(env.host());
    assert_eq!(vm.execute(&not_taken, &[]), Ok(Value::int32(10)));

    let taken = env.script(diamond(|b| {
        b.op(Opcode::False);
    }));
    env.jit.try_compile(&taken).unwrap();
    assert_eq!(vm.execute(&taken, &[]), Ok(Value::int32(20)));
}

#[test]
fn test_branch_on_argument() {
    let env = Env::new();
    let script = env.script(diamond(|b| {
        b.op_u16(Opcode::GetArg, 0);
    }));
    let method = env.jit.try_compile(&script).unwrap();
    assert_eq!(method.ic_entries()[0].kind, IcKind::ToBool);

    let mut vm = env.machine(env.host());
    assert_eq!(vm.execute(&script, &[Value::int32(1)]), Ok(Value::int32(10)));
    assert_eq!(vm.execute(&script, &[Value::int32(0)]), Ok(Value::int32(20)));
    assert_eq!(vm.execute(&script, &[env.string("")]), Ok(Value::int32(20)));
    assert_eq!(vm.execute(&script, &[Value::null()]), Ok(Value::int32(20)));
}

#[test]
fn test_loop() {
    let env = Env::new();
    assert_eq!(env.run(sum_loop(), &[]), Ok(Value::int32(55)));
}

#[test]
fn test_loop_in_debug_mode() {
    let env = Env::with_config(JitConfig {
        debug_mode: true,
        ..Default::default()
    });
    assert_eq!(env.run(sum_loop(), &[]), Ok(Value::int32(55)));
}

#[test]
fn test_short_circuit_or() {
    let env = Env::new();
    let or = |v: Value| {
        let mut b = ProgramBuilder::new("or").args(1);
        b.op_u16(Opcode::GetArg, 0);
        let done = b.jump(Opcode::Or);
        b.op(Opcode::Pop).int(7);
        b.bind(done);
        b.op(Opcode::Return);
        env.run(b, &[v])
    };
    assert_eq!(or(Value::int32(3)), Ok(Value::int32(3)));
    assert_eq!(or(Value::int32(0)), Ok(Value::int32(7)));
}

#[test]
fn test_short_circuit_and() {
    let env = Env::new();
    let and = |v: Value| {
        let mut b = ProgramBuilder::new("and").args(1);
        b.op_u16(Opcode::GetArg, 0);
        let done = b.jump(Opcode::And);
        b.op(Opcode::Pop).int(7);
        b.bind(done);
        b.op(Opcode::Return);
        env.run(b, &[v])
    };
    assert_eq!(and(Value::int32(3)), Ok(Value::int32(7)));
    assert_eq!(and(Value::null()), Ok(Value::null()));
}

#[test]
fn test_stop_returns_undefined() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("stop").args(1);
    b.op_u16(Opcode::GetArg, 0);
    let skip = b.jump(Opcode::IfNe);
    b.op(Opcode::Stop);
    b.bind(skip);
    b.int(1).op(Opcode::Return);

    let script = env.script(b);
    env.jit.try_compile(&script).unwrap();
    let mut vm = env.machine(env.host());
    assert_eq!(vm.execute(&script, &[Value::bool(false)]), Ok(Value::undefined()));
    assert_eq!(vm.execute(&script, &[Value::bool(true)]), Ok(Value::int32(1)));
}

// ============================================================================
// 4. Execution: names, properties, calls
// ============================================================================

#[test]
fn test_names_and_globals() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("names");
    b.int(5)
        .op_atom(Opcode::SetName, "x")
        .op(Opcode::Pop)
        .op_atom(Opcode::GetName, "x")
        .op_atom(Opcode::GetGlobal, "y")
        .op(Opcode::Add)
        .op_atom(Opcode::SetGlobal, "z")
        .op(Opcode::Return);
    let script = env.script(b);
    env.jit.try_compile(&script).unwrap();

    let mut host = env.host();
    host.define_global("y", Value::int32(10));
    let mut vm = env.machine(host);
    assert_eq!(vm.execute(&script, &[]), Ok(Value::int32(15)));

    let z = env.atoms.intern("z");
    assert_eq!(vm.host_mut().get_global(z), Ok(Value::int32(15)));
}

#[test]
fn test_unbound_name_is_reference_error() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("unbound");
    b.int(1)
        .op_atom(Opcode::GetName, "missing")
        .op(Opcode::Add)
        .op(Opcode::Return);
    let script = env.script(b);
    env.jit.try_compile(&script).unwrap();

    let mut vm = env.machine(env.host());
    assert_eq!(
        vm.execute(&script, &[]),
        Err(VmError::ReferenceError("missing".into()))
    );
    // The failed activation leaves nothing behind
    assert!(vm.stack().is_empty());
}

#[test]
fn test_properties_and_elements() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("props");
    b.op_atom(Opcode::GetGlobal, "o")
        .int(7)
        .op_atom(Opcode::SetProp, "x")
        .op(Opcode::Pop)
        .op_atom(Opcode::GetGlobal, "o")
        .op(Opcode::Zero)
        .op_atom(Opcode::GetGlobal, "o")
        .op_atom(Opcode::GetProp, "x")
        .op(Opcode::SetElem)
        .op(Opcode::Pop)
        .op_atom(Opcode::GetGlobal, "o")
        .op(Opcode::Zero)
        .op(Opcode::GetElem)
        .op(Opcode::Return);
    let script = env.script(b);
    env.jit.try_compile(&script).unwrap();

    let mut host = env.host();
    let obj = host.alloc_object();
    host.define_global("o", obj);
    let mut vm = env.machine(host);
    assert_eq!(vm.execute(&script, &[]), Ok(Value::int32(7)));
}

#[test]
fn test_set_prop_yields_assigned_value() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("assign");
    b.op_atom(Opcode::GetGlobal, "o")
        .string("v")
        .op_atom(Opcode::SetProp, "p")
        .op(Opcode::Return);
    let script = env.script(b);
    env.jit.try_compile(&script).unwrap();

    let mut host = env.host();
    let obj = host.alloc_object();
    host.define_global("o", obj);
    let mut vm = env.machine(host);
    assert_eq!(vm.execute(&script, &[]), Ok(env.string("v")));
}

#[test]
fn test_call_native_and_script() {
    fn add1(_this: Value, args: &[Value]) -> Result<Value, VmError> {
        let n = args.first().and_then(|v| v.as_int32()).unwrap_or(0);
        Ok(Value::int32(n + 1))
    }

    let env = Env::new();

    let mut double = ProgramBuilder::new("double").args(1);
    double
        .op_u16(Opcode::GetArg, 0)
        .op_u16(Opcode::GetArg, 0)
        .op(Opcode::Add)
        .op(Opcode::Return);
    let double = Arc::new(env.script(double));
    env.jit.try_compile(&double).unwrap();

    let mut main = ProgramBuilder::new("main");
    main.op_atom(Opcode::GetGlobal, "double")
        .op(Opcode::Undefined)
        .op_atom(Opcode::GetGlobal, "add1")
        .op(Opcode::Undefined)
        .int(20)
        .op_u16(Opcode::Call, 1)
        .op_u16(Opcode::Call, 1)
        .op(Opcode::Return);
    let main = env.script(main);
    let method = env.jit.try_compile(&main).unwrap();
    assert_eq!(
        method
            .ic_entries()
            .iter()
            .filter(|e| matches!(e.kind, IcKind::Call(1)))
            .count(),
        2
    );

    let mut host = env.host();
    let f = host.define_script(double.clone());
    host.define_global("double", f);
    let g = host.define_native(add1);
    host.define_global("add1", g);

    let mut vm = env.machine(host);
    assert_eq!(vm.execute(&main, &[]), Ok(Value::int32(42)));
    assert!(vm.stack().is_empty());
}

#[test]
fn test_calling_uncompiled_script_fails() {
    let env = Env::new();
    let mut callee = ProgramBuilder::new("callee");
    callee.op(Opcode::Stop);
    let callee = Arc::new(env.script(callee));

    let mut main = ProgramBuilder::new("main");
    main.op_atom(Opcode::GetGlobal, "callee")
        .op(Opcode::Undefined)
        .op_u16(Opcode::Call, 0)
        .op(Opcode::Return);
    let main = env.script(main);
    env.jit.try_compile(&main).unwrap();

    let mut host = env.host();
    let f = host.define_script(callee);
    host.define_global("callee", f);
    let mut vm = env.machine(host);
    assert_eq!(
        vm.execute(&main, &[]),
        Err(VmError::NotCompiled("callee".into()))
    );
}

#[test]
fn test_runaway_recursion_hits_stack_check() {
    let env = Env::with_config(JitConfig {
        max_native_depth: 32,
        ..Default::default()
    });
    let mut b = ProgramBuilder::new("recurse");
    b.op_atom(Opcode::GetGlobal, "recurse")
        .op(Opcode::Undefined)
        .op_u16(Opcode::Call, 0)
        .op(Opcode::Return);
    let script = Arc::new(env.script(b));
    env.jit.try_compile(&script).unwrap();

    let mut host = env.host();
    let f = host.define_script(script.clone());
    host.define_global("recurse", f);
    let mut vm = env.machine(host);

    assert_eq!(
        vm.execute(&script, &[]),
        Err(VmError::StackOverflow { depth: 33 })
    );
    assert_eq!(vm.depth(), 0);
    assert!(vm.stack().is_empty());
}

#[test]
fn test_execute_without_baseline() {
    let env = Env::new();
    let script = env.script(one_plus_two());
    let mut vm = env.machine(env.host());
    assert_eq!(
        vm.execute(&script, &[]),
        Err(VmError::NotCompiled("one_plus_two".into()))
    );

    env.jit.try_compile(&script).unwrap();
    assert!(script.discard_baseline().is_some());
    assert!(vm.execute(&script, &[]).is_err());
}

// ============================================================================
// Stub chains
// ============================================================================

fn int_add_stub(frame: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    let lhs = frame.reg(ValueReg::R0).as_int32();
    let rhs = frame.reg(ValueReg::R1).as_int32();
    match (lhs, rhs) {
        (Some(a), Some(b)) => match a.checked_add(b) {
            Some(sum) => {
                frame.set_reg(ValueReg::R0, Value::int32(sum));
                Ok(StubResult::Done)
            }
            None => Ok(StubResult::Next),
        },
        _ => Ok(StubResult::Next),
    }
}

fn never_matches(_: &mut IcFrame<'_>) -> Result<StubResult, VmError> {
    Ok(StubResult::Next)
}

#[test]
fn test_specialized_stubs_chain_to_fallback() {
    let env = Env::new();
    let script = env.script(one_plus_two());
    let method = env.jit.try_compile(&script).unwrap();

    method.prepend_stub(IcIndex(0), never_matches).unwrap();
    method.prepend_stub(IcIndex(0), int_add_stub).unwrap();
    assert_eq!(
        method.stub_chain(IcIndex(0)),
        vec![StubKind::Specialized, StubKind::Specialized, StubKind::Fallback]
    );

    let mut vm = env.machine(env.host());
    assert_eq!(vm.execute(&script, &[]), Ok(Value::int32(3)));

    let mut visited = Vec::new();
    script.trace_stubs(|entry, _, stub| visited.push((entry, stub.kind)));
    assert_eq!(visited.len(), 3);
    assert!(visited.iter().all(|(entry, _)| *entry == IcIndex(0)));
}

#[test]
fn test_chain_of_only_guards_falls_through() {
    let env = Env::new();
    let mut b = ProgramBuilder::new("strings");
    b.string("a").string("b").op(Opcode::Add).op(Opcode::Return);
    let script = env.script(b);
    let method = env.jit.try_compile(&script).unwrap();
    method.prepend_stub(IcIndex(0), int_add_stub).unwrap();

    let mut vm = env.machine(env.host());
    assert_eq!(vm.execute(&script, &[]), Ok(env.string("ab")));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_compilation() {
    let env = Env::new();
    let scripts: Vec<Script> = (0..8)
        .map(|i| {
            let mut b = ProgramBuilder::new(format!("s{i}"));
            b.int(i).int(i).op(Opcode::Mul).op(Opcode::Return);
            env.script(b)
        })
        .collect();
    let shared = env.script(sum_loop());

    crossbeam::scope(|s| {
        for script in &scripts {
            let jit = &env.jit;
            let shared = &shared;
            s.spawn(move |_| {
                assert_eq!(jit.compile(script), MethodStatus::Compiled);
                assert_eq!(jit.compile(shared), MethodStatus::Compiled);
            });
        }
    })
    .unwrap();

    let mut vm = env.machine(env.host());
    for (i, script) in scripts.iter().enumerate() {
        let i = i as i32;
        assert_eq!(vm.execute(script, &[]), Ok(Value::int32(i * i)));
    }
    assert_eq!(vm.execute(&shared, &[]), Ok(Value::int32(55)));
}
