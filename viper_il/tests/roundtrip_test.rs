//! Round-trip tests: parse(serialize(M)) is structurally M, and its
//! serialization is byte-identical.

use proptest::prelude::*;
use viper_il::registry::{Registry, RtSignature};
use viper_il::{parse_module, print_module, verify_module, Const, ModuleBuilder, Opcode, Operand, Type};

fn test_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(RtSignature::new("rt_str_concat", [Type::Str, Type::Str], Type::Str))
        .unwrap();
    registry
        .register(RtSignature::new("rt_print_str", [Type::Str], Type::Void))
        .unwrap();
    registry
}

/// A corpus of verified modules covering every opcode family
const CORPUS: &[&str] = &[
    // arithmetic and comparisons
    "il 0.1.0

func @arith(%x: i64, %y: i64) -> i1 {
entry:
  %s = iadd %x, %y
  %d = isub %s, 1:i64
  %m = imul %d, %d
  %q = sdiv %m, 3:i64
  %r = srem %m, 3:i64
  %n = ineg %r
  %c = scmp.lt %n, %q
  ret %c
}
",
    // checked ops and EH
    "il 0.1.0

func @guarded(%a: i32, %b: i32) -> i32 {
entry:
  eh.push ^h
  %q = sdiv.chk0 %a, %b
  %s = iadd.ovf %q, 1:i32
  eh.pop
  ret %s
h(%err: error, %tok: resume_tok):
  ret -1:i32
}
",
    // floats, casts, select
    "il 0.1.0

func @fp(%x: f64) -> i32 {
entry:
  %half = fmul %x, 0.5:f64
  %p = pow %half, 2.0:f64
  %big = fcmp.ogt %p, 100.0:f64
  %i = cast.fp_to_si.rte.chk %p to i32
  %r = select %big, 0:i32, %i
  ret %r
}
",
    // memory and bounds checks
    "il 0.1.0

func @mem() -> i64 {
entry:
  %p = alloca 16:i64, 8:i64
  store 42:i64, %p
  %q = gep %p, 8:i64
  store 7:i64, %q
  %e = idx.chk %p, 8:i64, 0:i64, 16:i64
  %v = load i64, %e
  ret %v
}
",
    // control flow: cbr, switch, block params
    "il 0.1.0

func @classify(%x: i32) -> i32 {
entry:
  switch %x, ^other [ 0:i32 -> ^zero, 1:i32 -> ^one ]
zero:
  br ^join(100:i32)
one:
  br ^join(200:i32)
other:
  %neg = scmp.lt %x, 0:i32
  cbr %neg, ^join(-1:i32), ^join(1:i32)
join(%r: i32):
  ret %r
}
",
    // externs, strings, globals
    "il 0.1.0

extern @rt_print_str(str) -> void
extern @rt_str_concat(str, str) -> str

global @greeting_count: i64 = 0:i64

func @greet() -> void {
entry:
  %s = call @rt_str_concat(\"hello \":str, \"world\":str)
  call @rt_print_str(%s)
  ret
}
",
    // unsigned ops and shifts
    "il 0.1.0

func @bits(%x: u32, %k: u32) -> u32 {
entry:
  %a = and %x, 255:u32
  %s = shl %a, %k
  %l = lshr %s, 1:u32
  %o = or %l, 1:u32
  %q = udiv.chk0 %o, 3:u32
  ret %q
}
",
    // resume.next and trap introspection
    "il 0.1.0

func @resilient() -> i32 {
entry:
  eh.push ^h
  %p = alloca 4:i64, 4:i64
  %v = idx.chk %p, 8:i32, 0:i32, 4:i32
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  %k = trap.kind
  %is_bounds = icmp.eq %k, 5:i32
  cbr %is_bounds, ^fine, ^giveup
fine:
  resume.next %tok
giveup:
  trap.from_err InvalidOperation, 0:i32
}
",
];

#[test]
fn corpus_round_trips() {
    let registry = test_registry();
    for (index, text) in CORPUS.iter().enumerate() {
        let module = parse_module(text).unwrap_or_else(|diags| panic!("corpus[{}] failed to parse:\n{}", index, diags));
        let diags = verify_module(&module, &registry);
        assert!(!diags.has_errors(), "corpus[{}] failed verification:\n{}", index, diags);

        let printed = print_module(&module);
        let reparsed = parse_module(&printed)
            .unwrap_or_else(|diags| panic!("corpus[{}] reparse failed:\n{}\n---\n{}", index, diags, printed));
        assert_eq!(module, reparsed, "corpus[{}] structural round trip", index);
        assert_eq!(printed, print_module(&reparsed), "corpus[{}] serialization round trip", index);

        let rediags = verify_module(&reparsed, &registry);
        assert!(!rediags.has_errors(), "corpus[{}] reparse failed verification", index);
    }
}

#[test]
fn json_round_trip() {
    let module = parse_module(CORPUS[1]).unwrap();
    let json = serde_json::to_string(&module).unwrap();
    let back: viper_il::Module = serde_json::from_str(&json).unwrap();
    assert_eq!(module, back);
    assert_eq!(print_module(&module), print_module(&back));
}

/// Build a straight-line arithmetic function from a recipe of (op, constant)
/// steps; used by the property test below.
fn build_chain(steps: &[(u8, i32)]) -> viper_il::Module {
    let mut mb = ModuleBuilder::new();
    let mut fb = mb.function("chain", &[("x", Type::I64)], Type::I64).unwrap();
    let mut acc = Operand::Temp(fb.params()[0]);
    for (index, (op, value)) in steps.iter().enumerate() {
        let op = match op % 6 {
            0 => Opcode::Iadd,
            1 => Opcode::Isub,
            2 => Opcode::Imul,
            3 => Opcode::And,
            4 => Opcode::Or,
            _ => Opcode::Xor,
        };
        let result = fb.binary(op, acc, Const::i64(*value as i64), &format!("t{}", index));
        acc = Operand::Temp(result);
    }
    fb.ret(Some(acc));
    fb.finish().unwrap();
    mb.finalize(&Registry::new()).expect("generated module must verify")
}

proptest! {
    #[test]
    fn generated_modules_round_trip(steps in proptest::collection::vec((any::<u8>(), any::<i32>()), 0..40)) {
        let module = build_chain(&steps);
        let printed = print_module(&module);
        let reparsed = parse_module(&printed).expect("printed module must parse");
        prop_assert_eq!(&module, &reparsed);
        prop_assert_eq!(printed, print_module(&reparsed));
    }
}
