//! Source-program tests exercising spec.md section 8's round-trip and
//! boundary properties end to end through `Interpreter::run_str`, the
//! way `fuel-vm/tests/*.rs` drives whole-program behavior through the
//! public `Interpreter` rather than poking at internals.

use tacit_types::value::Decoded;
use tacit_vm::config::VmConfig;
use tacit_vm::interpreter::Interpreter;

fn run(src: &str) -> Interpreter {
    Interpreter::run_str(VmConfig::default(), src).unwrap()
}

#[test]
fn plain_number_literal_round_trips() {
    let mut vm = run("42");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(42.0));
}

#[test]
fn colon_definition_round_trips() {
    let mut vm = run(": sq dup * ; 5 sq");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(25.0));
}

#[test]
fn list_literal_and_length() {
    let mut vm = run("( 1 2 3 ) length");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(3.0));
}

#[test]
fn nested_list_element_unpacks_the_inner_list() {
    let mut vm = run("( ( 1 2 ) 3 ) 0 elem length");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(2.0));
}

#[test]
fn if_treats_a_non_numeric_condition_as_falsy() {
    // spec.md section 4.9: IfFalseBranch branches "when the value is
    // zero or non-numeric" — NIL must take the else branch, not the
    // then branch.
    let mut vm = run("NIL if 10 else 20 ;");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(20.0));
}

#[test]
fn case_picks_the_matching_clause() {
    let mut vm = run("5 case 1 of 10 ; 5 of 50 ; DEFAULT of 0 ; ;");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(50.0));
}

#[test]
fn case_falls_through_to_default() {
    let mut vm = run("3 case 1 of 10 ; 5 of 50 ; DEFAULT of 0 ; ;");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(0.0));
}

#[test]
fn capsule_counter_survives_two_dispatches() {
    let mut vm = run(
        ": inc drop 1 slot dup fetch 1 + swap store ; \
         : counter ( 'inc 0 capsule ; \
         counter 1 dispatch 1 dispatch 1 elem",
    );
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(2.0));
}

#[test]
fn a_definition_spanning_multiple_lines_compiles_as_one_unit() {
    let mut vm = run(": sq\n  dup\n  *\n;\n5 sq");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(25.0));
}

#[test]
fn empty_program_leaves_the_stack_empty() {
    let mut vm = run("");
    assert!(vm.pop_stack().is_err());
}

#[test]
fn unterminated_definition_is_an_unclosed_error() {
    let Err(err) = Interpreter::run_str(VmConfig::default(), ": foo 1 2 +") else {
        panic!("expected an unclosed-construct error");
    };
    let msg = err.to_string();
    assert!(msg.to_lowercase().contains("unclosed"), "expected an unclosed-construct error, got: {msg}");
}

#[test]
fn of_without_case_is_a_syntax_error() {
    let Err(err) = Interpreter::run_str(VmConfig::default(), "1 of 2 ;") else {
        panic!("expected a syntax error");
    };
    let msg = err.to_string();
    assert!(msg.to_lowercase().contains("syntax") || msg.to_lowercase().contains("case"), "expected a syntax error, got: {msg}");
}

#[test]
fn dictionary_checkpoint_forgets_locals_but_keeps_the_word() {
    // `f`'s own entry survives past `;` even though its local `n` is
    // forgotten at the end of the definition (spec.md section 8 property 5) —
    // proven by calling it twice, since a leaked/broken checkpoint would
    // corrupt the second call's dictionary lookups.
    let mut vm = run(": f 0 var n 7 dup -> n ; f f");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(7.0));
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(7.0));
}

#[test]
fn store_onto_a_compound_slot_is_refused() {
    // slot 0 of the outer list holds a nested LIST; storing through it
    // is refused (spec.md section 8 property 7) and the nested list is
    // still there, unmodified, afterward.
    let mut vm = run("( ( 1 2 ) 3 ) 0 slot 99 swap store drop 0 elem length");
    assert_eq!(vm.pop_stack().unwrap().untag(), Decoded::Number(2.0));
}
