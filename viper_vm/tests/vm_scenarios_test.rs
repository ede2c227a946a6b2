//! End-to-end VM scenarios: trap handling, resumption, polling, the
//! unhandled-trap diagnostic and the runtime bridge.

use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::io::Write as _;
use std::rc::Rc;
use viper_il::{parse_module, verify_module, Module, TrapKind};
use viper_runtime::{default_registry, standard_library};
use viper_vm::{BreakSpec, PauseReason, RunConfig, RunState, RtValue, Vm};

fn load(text: &str) -> Module {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = parse_module(text).unwrap_or_else(|diags| panic!("parse failed:\n{}", diags));
    let diags = verify_module(&module, &default_registry());
    assert!(!diags.has_errors(), "verification failed:\n{}", diags);
    module
}

fn run_main(module: &Module) -> RunState {
    let registry = default_registry();
    let library = standard_library();
    let mut vm = Vm::new(module, &registry, &library, RunConfig::default()).unwrap();
    vm.run("main", vec![]).unwrap()
}

#[test]
fn scenario_divide_and_handle() {
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  eh.push ^h
  %q = sdiv.chk0 10:i32, 0:i32
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  ret 1:i32
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i32(1))));
}

#[test]
fn scenario_resume_next_after_bounds_trap() {
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  eh.push ^h
  %p = alloca 4:i64, 4:i64
  %v = idx.chk %p, 8:i32, 0:i32, 4:i32
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  resume.next %tok
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i32(0))));
}

#[test]
fn scenario_unhandled_trap_diagnostic() {
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %q = sdiv.chk0 1:i32, 0:i32
  ret %q
}
",
    );
    let state = run_main(&module);
    let info = match state {
        RunState::Trapped(info) => info,
        other => panic!("expected trap, got {:?}", other),
    };
    let text = info.to_string();
    assert!(text.contains("Trap: DivideByZero"), "{}", text);
    assert!(text.contains("Function: @main"), "{}", text);
    assert!(text.contains("IL: @main#entry#0"), "{}", text);
    assert!(text.contains("Source line: -1"), "{}", text);
}

#[test]
fn scenario_interrupt_polling_pause_and_resume() {
    // 1 branch + 166 iterations of 3 instructions + 1 ret = 500 dispatched
    let module = load(
        "\
il 0.1.0

func @main() -> i64 {
entry:
  br ^loop(0:i64)
loop(%i: i64):
  %next = iadd %i, 1:i64
  %done = icmp.eq %next, 166:i64
  cbr %done, ^exit, ^loop(%next)
exit:
  ret 42:i64
}
",
    );

    let calls = Rc::new(RefCell::new(0u32));
    let calls_in_poll = calls.clone();
    let config = RunConfig::default().with_interrupts(
        100,
        Box::new(move |vm: &mut Vm| {
            *calls_in_poll.borrow_mut() += 1;
            // the callback sees the VM itself, at a whole-instruction boundary
            assert_eq!(vm.steps() % 100, 0);
            assert_eq!(vm.frame_depth(), 1);
            *calls_in_poll.borrow() != 2
        }),
    );

    let registry = default_registry();
    let library = standard_library();
    let mut vm = Vm::new(&module, &registry, &library, config).unwrap();

    let state = vm.run("main", vec![]).unwrap();
    assert_eq!(state, RunState::Paused(PauseReason::Interrupt));
    assert_eq!(vm.steps(), 200, "paused at the second poll boundary");

    let state = vm.continue_run().unwrap();
    assert_eq!(state, RunState::Completed(Some(RtValue::i64(42))));
    assert_eq!(vm.steps(), 500, "exactly 500 instructions dispatched");
    assert_eq!(*calls.borrow(), 4, "polled at 100, 200, 300 and 400");
}

#[test]
fn scenario_round_trip_then_execute() {
    let text = "\
il 0.1.0

func @main() -> i32 {
entry:
  %a = iadd 20:i32, 1:i32
  %b = imul %a, 2:i32
  ret %b
}
";
    let module = load(text);
    let printed = viper_il::print_module(&module);
    let reparsed = load(&printed);
    assert_eq!(viper_il::print_module(&reparsed), printed);
    assert_eq!(run_main(&reparsed), RunState::Completed(Some(RtValue::i32(42))));
}

#[test]
fn scenario_bridge_trap_mapping_unhandled() {
    let module = load(
        "\
il 0.1.0

extern @rt_file_open(str, ptr) -> ptr

func @main() -> i32 {
entry:
  %slot = alloca 4:i64, 4:i64
  %f = call @rt_file_open(\"/viper/definitely/missing.txt\":str, %slot)
  ret 0:i32
}
",
    );
    let state = run_main(&module);
    let info = match state {
        RunState::Trapped(info) => info,
        other => panic!("expected trap, got {:?}", other),
    };
    assert_eq!(info.kind, TrapKind::FileNotFound);
    assert!(info.to_string().contains("Trap: FileNotFound"));
}

#[test]
fn scenario_bridge_trap_mapping_handled() {
    // The handler inspects the error record: kind is the trap kind, the
    // sub-code is the runtime's own error code, and the err-out slot holds
    // the same code for the IL to load.
    let module = load(
        "\
il 0.1.0

extern @rt_file_open(str, ptr) -> ptr

func @main() -> i32 {
entry:
  %slot = alloca 4:i64, 4:i64
  eh.push ^h
  %f = call @rt_file_open(\"/viper/definitely/missing.txt\":str, %slot)
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  %k = trap.kind
  ret %k
}
",
    );
    let state = run_main(&module);
    assert_eq!(state, RunState::Completed(Some(RtValue::i32(TrapKind::FileNotFound.code()))));
}

#[test]
fn call_and_return_across_frames() {
    let module = load(
        "\
il 0.1.0

func @main() -> i64 {
entry:
  %r = call @fib(10:i64)
  ret %r
}

func @fib(%n: i64) -> i64 {
entry:
  %base = scmp.lt %n, 2:i64
  cbr %base, ^done, ^recurse
done:
  ret %n
recurse:
  %n1 = isub %n, 1:i64
  %a = call @fib(%n1)
  %n2 = isub %n, 2:i64
  %b = call @fib(%n2)
  %sum = iadd %a, %b
  ret %sum
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i64(55))));
}

#[test]
fn trap_unwinds_through_callee_frames() {
    // The trap fires inside @inner with no handler there; it unwinds into
    // @main's handler.
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  eh.push ^h
  %r = call @inner(0:i32)
  eh.pop
  ret %r
h(%err: error, %tok: resume_tok):
  ret 99:i32
}

func @inner(%d: i32) -> i32 {
entry:
  %q = sdiv.chk0 1:i32, %d
  ret %q
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i32(99))));
}

#[test]
fn resume_label_routes_to_fallback() {
    // The handler abandons the faulting computation and routes control to a
    // fallback block, which still owes the eh.pop for the live handler entry
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  eh.push ^h
  %q = sdiv.chk0 8:i32, 0:i32
  eh.pop
  ret %q
h(%err: error, %tok: resume_tok):
  resume.label %tok, ^fallback
fallback:
  eh.pop
  ret 123:i32
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i32(123))));
}

#[test]
fn rethrow_propagates_outward() {
    // A trap inside the active handler must not re-enter the same handler
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %r = call @risky()
  ret %r
}

func @risky() -> i32 {
entry:
  eh.push ^h
  %q = sdiv.chk0 1:i32, 0:i32
  eh.pop
  ret %q
h(%err: error, %tok: resume_tok):
  trap.from_err IOError, 7:i32
}
",
    );
    let info = match run_main(&module) {
        RunState::Trapped(info) => info,
        other => panic!("expected trap, got {:?}", other),
    };
    assert_eq!(info.kind, TrapKind::IOError);
    assert_eq!(info.code, 7);
}

#[test]
fn max_steps_raises_runtime_error() {
    let module = load(
        "\
il 0.1.0

func @main() -> i64 {
entry:
  br ^spin(0:i64)
spin(%i: i64):
  %n = iadd %i, 1:i64
  br ^spin(%n)
}
",
    );
    let registry = default_registry();
    let library = standard_library();
    let config = RunConfig::default().with_max_steps(1000);
    let mut vm = Vm::new(&module, &registry, &library, config).unwrap();
    let info = match vm.run("main", vec![]).unwrap() {
        RunState::Trapped(info) => info,
        other => panic!("expected trap, got {:?}", other),
    };
    assert_eq!(info.kind, TrapKind::RuntimeError);
}

#[test]
fn breakpoint_pauses_and_resumes() {
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %a = iadd 1:i32, 2:i32
  %b = imul %a, 3:i32
  ret %b
}
",
    );
    let registry = default_registry();
    let library = standard_library();
    let config = RunConfig::default().with_breakpoint(BreakSpec::At {
        function: "main".to_string(),
        block: "entry".to_string(),
        index: 1,
    });
    let mut vm = Vm::new(&module, &registry, &library, config).unwrap();

    let state = vm.run("main", vec![]).unwrap();
    assert_eq!(state, RunState::Paused(PauseReason::Breakpoint));
    assert_eq!(vm.steps(), 1, "paused before the second instruction");
    assert_eq!(vm.frame_depth(), 1);

    let state = vm.continue_run().unwrap();
    assert_eq!(state, RunState::Completed(Some(RtValue::i32(9))));
}

#[test]
fn paused_state_is_inspectable() {
    // A watch is a host-side loop: step, read the temp, compare
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %a = iadd 1:i32, 2:i32
  %b = imul %a, 3:i32
  ret %b
}
",
    );
    let registry = default_registry();
    let library = standard_library();
    let config = RunConfig::default().with_breakpoint(BreakSpec::At {
        function: "main".to_string(),
        block: "entry".to_string(),
        index: 0,
    });
    let mut vm = Vm::new(&module, &registry, &library, config).unwrap();
    assert_eq!(vm.run("main", vec![]).unwrap(), RunState::Paused(PauseReason::Breakpoint));

    assert_eq!(vm.current_location(), Some(("main", "entry", 0)));
    assert_eq!(vm.read_temp("a"), None, "not yet written");

    assert_eq!(vm.step().unwrap(), RunState::Paused(PauseReason::Step));
    assert_eq!(vm.read_temp("a"), Some(RtValue::i32(3)));
    assert_eq!(vm.current_location(), Some(("main", "entry", 1)));
}

#[test]
fn single_stepping() {
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %a = iadd 1:i32, 2:i32
  ret %a
}
",
    );
    let registry = default_registry();
    let library = standard_library();
    let config = RunConfig::default().with_breakpoint(BreakSpec::At {
        function: "main".to_string(),
        block: "entry".to_string(),
        index: 0,
    });
    let mut vm = Vm::new(&module, &registry, &library, config).unwrap();
    assert_eq!(vm.run("main", vec![]).unwrap(), RunState::Paused(PauseReason::Breakpoint));

    assert_eq!(vm.step().unwrap(), RunState::Paused(PauseReason::Step));
    assert_eq!(vm.step().unwrap(), RunState::Completed(Some(RtValue::i32(3))));
}

#[test]
fn op_counts_and_trace() {
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %a = iadd 1:i32, 2:i32
  %b = iadd %a, 3:i32
  ret %b
}
",
    );
    let registry = default_registry();
    let library = standard_library();

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);
    impl std::io::Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(data)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let sink = SharedBuf::default();
    let config = RunConfig::default().with_op_counts().with_trace(Box::new(sink.clone()));
    let mut vm = Vm::new(&module, &registry, &library, config).unwrap();
    vm.run("main", vec![]).unwrap();

    assert_eq!(vm.op_counts()[viper_il::Opcode::Iadd as usize], 2);
    assert_eq!(vm.op_counts()[viper_il::Opcode::Ret as usize], 1);

    let trace = String::from_utf8(sink.0.borrow().clone()).unwrap();
    assert_eq!(trace, "@main#entry#0: iadd\n@main#entry#1: iadd\n@main#entry#2: ret\n");
}

#[test]
fn string_runtime_round_trip() {
    let module = load(
        "\
il 0.1.0

extern @rt_str_concat(str, str) -> str
extern @rt_str_len(str) -> i64

func @main() -> i64 {
entry:
  %s = call @rt_str_concat(\"viper \":str, \"il\":str)
  %n = call @rt_str_len(%s)
  ret %n
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i64(8))));
}

#[test]
fn pow_domain_error_via_runtime() {
    let module = load(
        "\
il 0.1.0

extern @rt_pow_f64_chkdom(f64, f64) -> f64

func @main() -> i32 {
entry:
  eh.push ^h
  %r = call @rt_pow_f64_chkdom(-8.0:f64, 0.5:f64)
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  %k = trap.kind
  ret %k
}
",
    );
    assert_eq!(
        run_main(&module),
        RunState::Completed(Some(RtValue::i32(TrapKind::DomainError.code())))
    );
}

#[test]
fn branch_equivalence_law() {
    // cbr true, ^T(args), ^F(args') behaves as br ^T(args)
    let cbr_module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %t = icmp.eq 0:i32, 0:i32
  cbr %t, ^yes(7:i32), ^no(8:i32)
yes(%a: i32):
  ret %a
no(%b: i32):
  ret %b
}
",
    );
    let br_module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  br ^yes(7:i32)
yes(%a: i32):
  ret %a
}
",
    );
    assert_eq!(run_main(&cbr_module), run_main(&br_module));
}

#[test]
fn switch_dispatch() {
    let module = load(
        "\
il 0.1.0

func @main() -> i32 {
entry:
  %r0 = call @classify(0:i32)
  %r1 = call @classify(1:i32)
  %r9 = call @classify(9:i32)
  %a = iadd %r0, %r1
  %b = iadd %a, %r9
  ret %b
}

func @classify(%x: i32) -> i32 {
entry:
  switch %x, ^other [ 0:i32 -> ^zero, 1:i32 -> ^one ]
zero:
  ret 100:i32
one:
  ret 200:i32
other:
  ret 1:i32
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i32(301))));
}

#[test]
fn indirect_call_through_function_pointer() {
    let module = load(
        "\
il 0.1.0

func @double(%x: i64) -> i64 {
entry:
  %r = imul %x, 2:i64
  ret %r
}

func @main() -> i64 {
entry:
  %fp = select 1:i1, @double, @double
  %r = call.indirect %fp(21:i64) -> i64
  ret %r
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i64(42))));
}

#[test]
fn alloca_load_store_round_trip() {
    let module = load(
        "\
il 0.1.0

func @main() -> i64 {
entry:
  %p = alloca 16:i64, 8:i64
  store 40:i64, %p
  %q = gep %p, 8:i64
  store 2:i64, %q
  %a = load i64, %p
  %b = load i64, %q
  %sum = iadd %a, %b
  ret %sum
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i64(42))));
}

#[test]
fn globals_are_readable() {
    let module = load(
        "\
il 0.1.0

global @base: i64 = 40:i64

func @main() -> i64 {
entry:
  %r = iadd @base, 2:i64
  ret %r
}
",
    );
    assert_eq!(run_main(&module), RunState::Completed(Some(RtValue::i64(42))));
}
