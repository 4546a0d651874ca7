//! Property tests for the copy-on-write execution context: every mutator
//! must leave the original value untouched, and the prompt history must
//! stay densely indexed (0, 1, 2, ...) no matter which mutators ran.

#[macro_use]
extern crate proptest;

use proptest::prelude::*;
use threadgraph::context::{ExecutionContext, PromptRole};

#[derive(Clone, Debug)]
enum Op {
    SetVariable(String, i64),
    AddSystemPrompt(String),
    AddUserPrompt(String),
    AddOutput(String),
    ConvertOutputToInput,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let short_text = || prop::string::string_regex("[a-z]{1,8}").unwrap();
    prop_oneof![
        (short_text(), any::<i64>()).prop_map(|(name, value)| Op::SetVariable(name, value)),
        short_text().prop_map(Op::AddSystemPrompt),
        short_text().prop_map(Op::AddUserPrompt),
        short_text().prop_map(Op::AddOutput),
        Just(Op::ConvertOutputToInput),
    ]
}

fn apply(ctx: &ExecutionContext, op: &Op) -> ExecutionContext {
    match op {
        Op::SetVariable(name, value) => ctx.set_variable(name.clone(), serde_json::Value::from(*value)),
        Op::AddSystemPrompt(text) => ctx.add_system_prompt(text.clone()),
        Op::AddUserPrompt(text) => ctx.add_user_prompt(text.clone()),
        Op::AddOutput(text) => ctx.add_output(text.clone()),
        Op::ConvertOutputToInput => ctx.convert_output_to_input(),
    }
}

/// Dense indexing: after any sequence of mutators, `prompt_history[i].index == i`.
fn assert_dense(ctx: &ExecutionContext) {
    for (i, entry) in ctx.prompt_history().iter().enumerate() {
        assert_eq!(entry.index, i, "prompt history indices must stay dense");
    }
}

proptest! {
    #[test]
    fn every_mutator_returns_a_new_value_leaving_the_original_untouched(
        ops in prop::collection::vec(op_strategy(), 1..20),
    ) {
        let original = ExecutionContext::new();
        let before = original.clone();

        let mut current = original.clone();
        for op in &ops {
            current = apply(&current, op);
        }

        // The value `apply` was called on is never mutated by any op.
        prop_assert_eq!(&original, &before);
        assert_dense(&current);
    }

    #[test]
    fn next_index_always_matches_prompt_history_len(
        ops in prop::collection::vec(op_strategy(), 0..20),
    ) {
        let mut ctx = ExecutionContext::new();
        for op in &ops {
            ctx = apply(&ctx, op);
        }
        prop_assert_eq!(ctx.next_index(), ctx.prompt_history().len());
    }

    #[test]
    fn convert_output_to_input_preserves_index_and_rewrites_role(
        text in "[a-z]{1,12}",
    ) {
        let ctx = ExecutionContext::new().add_output(text.clone());
        let output_index = ctx.prompt_history().last().unwrap().index;
        let converted = ctx.convert_output_to_input();
        let entry = converted.prompt_history().last().unwrap().clone();
        prop_assert_eq!(entry.index, output_index);
        prop_assert_eq!(entry.role, PromptRole::Assistant);
        prop_assert_eq!(&entry.content, &text);
    }

    #[test]
    fn trim_to_index_rejects_indices_past_next_index(
        ops in prop::collection::vec(op_strategy(), 0..10),
        overshoot in 1usize..50,
    ) {
        let mut ctx = ExecutionContext::new();
        for op in &ops {
            ctx = apply(&ctx, op);
        }
        let too_far = ctx.next_index() + overshoot;
        prop_assert!(ctx.trim_to_index(too_far).is_err());
    }
}
