//! Property tests: parsing accepts any text and never escapes the contract

use std::sync::Arc;

use aiscript_runner::RunnerRegistry;
use aiscript_runner::engine::Limits;
use aiscript_runner::runner::{ErrorLabel, OutputSink, Runner};
use proptest::prelude::*;

fn runners() -> Vec<Box<dyn Runner>> {
    let registry = RunnerRegistry::builtin();
    registry
        .versions()
        .into_iter()
        .map(|version| {
            let sink: OutputSink = Arc::new(|_: &str| {});
            registry.create(version, sink, &Limits::default()).unwrap()
        })
        .collect()
}

/// Fragments of both dialects, glued together at random.
fn token_soup() -> impl Strategy<Value = String> {
    let fragment = prop::sample::select(vec![
        "let ", "var ", "#", "$", "x", "Core:type", " = ", " <- ", " += ", "<: ", "1", "0.5",
        "\"s\"", "yes", "true", "_", "null", "(", ")", "[", "]", "{", "}", ",", ":", ";", "\n",
        "@", "if ", "elif ", "else ", "loop ", "each ", "for ", "return", "break", " + ", " * ",
        " == ", " && ", "!", "-", ".len", "###", "// c\n", "/* c */",
    ]);
    prop::collection::vec(fragment, 0..40).prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn parse_never_panics_on_arbitrary_text(code in ".{0,120}") {
        for runner in runners() {
            match runner.parse(&code) {
                Ok(parsed) => prop_assert_eq!(parsed.tree.version(), runner.version()),
                Err(failure) => {
                    let error = failure.error();
                    prop_assert!(error.is_some());
                    prop_assert!(error.and_then(|err| runner.classify_error(err)).is_some());
                }
            }
        }
    }

    #[test]
    fn parse_failures_on_token_soup_are_syntax_errors(code in token_soup()) {
        for runner in runners() {
            if let Err(failure) = runner.parse(&code) {
                let label = failure.error().and_then(|err| runner.classify_error(err));
                prop_assert_eq!(label, Some(ErrorLabel::SyntaxError), "{:?}", code);
            }
        }
    }
}
