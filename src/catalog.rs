#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Built-in assertions.
//!
//! Expected literals here are fixture values tied to one specific prompt each;
//! they are kept exactly as written and never derived.

use serde_json::json;

use crate::{
    assertion::{Assertion, Check, ExtractPlan, ProgramCheck},
    extract::Heuristic,
    judge::JudgeCriterion,
    runner::{Fixture, Harness, Redirect, Toolchain},
    verdict::Expectation,
};

/// Text the word-count program reads.
const WORD_COUNT_TEXT: &str = "it was the best of times, it was the worst of times, it was the age of wisdom, it was the age of foolishness, it was the epoch of belief, it was the epoch of incredulity, it was the season of Light, it was the season of Darkness, it was the spring of hope, it was the winter of despair, we had everything before us, we had nothing before us, we were all going direct to Heaven, we were all going direct the other way";

/// Every built-in assertion, in a stable order.
pub fn builtin() -> Vec<Assertion> {
    vec![
        program_sqrt(),
        docker_cuda(),
        c_weird_expression(),
        implement_crc32(),
        convert_to_c_simple(),
        program_pipes_cpp(),
        make_sqlite_table(),
        rust_word_count(),
        bash_renamer(),
        bash_convert_not_overwrite(),
        data_extraction_byyear(),
        explain_code_prime(),
        aws_ipv6(),
    ]
}

/// Looks up a built-in assertion by name.
pub fn find(name: &str) -> Option<Assertion> {
    builtin().into_iter().find(|assertion| assertion.name == name)
}

/// Python square root without the standard library's `sqrt`.
fn program_sqrt() -> Assertion {
    let check = ProgramCheck::builder()
        .toolchain(Toolchain::Python)
        .harness(Harness::append("print(round(my_sqrt(12345), 1))"))
        .forbid([
            r"math\.sqrt",
            r"numpy\.sqrt",
            r"np\.sqrt",
            r"\bsqrt\(",
            r"from math import sqrt",
            r"import math.*sqrt",
        ])
        .expect(Expectation::contains_all(["111.1"]))
        .build();
    Assertion::new(
        "program_sqrt",
        "Python my_sqrt that does not call a built-in square root",
        Check::Program(check),
    )
}

/// Mentions a package that fixes Docker CUDA passthrough.
fn docker_cuda() -> Assertion {
    Assertion::new(
        "docker_cuda",
        "Docker CUDA fix mentions nvidia-container-toolkit or nvidia-docker2",
        Check::Text {
            extract: ExtractPlan::raw(),
            expect:  Expectation::contains_any(["nvidia-container-toolkit", "nvidia-docker2"]),
        },
    )
}

/// Rewrites a C expression; the answer follows a "final answer:" marker.
fn c_weird_expression() -> Assertion {
    Assertion::new(
        "c_weird_expression",
        "Final answer is equivalent to *x+2",
        Check::Text {
            extract: ExtractPlan::with_heuristics([Heuristic::AfterMarker {
                marker: "final answer:".into(),
            }]),
            expect:  Expectation::Contains {
                all_of:            Vec::new(),
                any_of:            vec!["*x+2".into(), "v+2".into()],
                none_of:           Vec::new(),
                ignore_case:       true,
                ignore_whitespace: true,
            },
        },
    )
}

/// C program printing the CRC-32 of a fixed phrase.
fn implement_crc32() -> Assertion {
    let check = ProgramCheck::builder()
        .toolchain(Toolchain::C)
        .expect(Expectation::Contains {
            all_of:            vec!["cb7e6e10".into()],
            any_of:            Vec::new(),
            none_of:           Vec::new(),
            ignore_case:       true,
            ignore_whitespace: false,
        })
        .build();
    Assertion::new(
        "implement_crc32",
        "C CRC-32 of 'correct horse battery staple'",
        Check::Program(check),
    )
}

/// Python my_sqrt rewritten in C, driven by a harness `main`.
fn convert_to_c_simple() -> Assertion {
    let harness = Harness::builder()
        .prelude("#include <stdio.h>\n#include <math.h>".to_string())
        .epilogue(
            "int main() {\n    printf(\"%d\\n\", (int)(my_sqrt(12345, .001)*10));\n    return 0;\n}"
                .to_string(),
        )
        .replace_main(true)
        .build();
    let check = ProgramCheck::builder()
        .extract(ExtractPlan {
            ascii: Some(true),
            ..ExtractPlan::default()
        })
        .toolchain(Toolchain::C)
        .harness(harness)
        .expect(Expectation::contains_all(["1111"]))
        .build();
    Assertion::new(
        "convert_to_c_simple",
        "C my_sqrt(12345, .001) * 10 truncates to 1111",
        Check::Program(check),
    )
}

/// C++ dataflow DSL evaluated by a harness `main`.
fn program_pipes_cpp() -> Assertion {
    let harness = Harness::builder()
        .epilogue(
            "int main() {\nConst(2) >> Square() >> Inc() >> Square() >> Square() >> Print();\nreturn 0;\n}"
                .to_string(),
        )
        .replace_main(true)
        .build();
    let check = ProgramCheck::builder()
        .toolchain(Toolchain::Cpp)
        .harness(harness)
        .expect(Expectation::contains_all(["625"]))
        .build();
    Assertion::new(
        "program_pipes_cpp",
        "C++ pipeline Const(2) >> Square() >> Inc() >> Square() >> Square() prints 625",
        Check::Program(check),
    )
}

/// SQL creating a `people` table with one known row.
fn make_sqlite_table() -> Assertion {
    let check = ProgramCheck::builder()
        .extract(ExtractPlan::with_heuristics([Heuristic::Keywords {
            words: vec!["create".into(), "insert".into()],
        }]))
        .toolchain(Toolchain::Sqlite {
            query: "SELECT * FROM people;".into(),
        })
        .expect(Expectation::Contains {
            all_of:            vec!["nicholas".into(), "5".into(), "research".into()],
            any_of:            Vec::new(),
            none_of:           Vec::new(),
            ignore_case:       true,
            ignore_whitespace: false,
        })
        .build();
    Assertion::new(
        "make_sqlite_table",
        "SQLite people table holds Nicholas, age 5, a researcher",
        Check::Program(check),
    )
}

/// Rust word counter printing JSON for a fixed text.
fn rust_word_count() -> Assertion {
    let check = ProgramCheck::builder()
        .toolchain(Toolchain::Rust)
        .fixtures(vec![Fixture::new("file.txt", WORD_COUNT_TEXT)])
        .redirects(vec![Redirect::new("/tmp/file.txt", "file.txt")])
        .expect(Expectation::JsonSubset {
            expected:  json!({
                "the": 11, "it": 10, "was": 10, "of": 10, "we": 4, "times,": 2, "age": 2,
                "epoch": 2, "season": 2, "had": 2, "before": 2, "us,": 2, "were": 2,
                "all": 2, "going": 2, "direct": 2, "best": 1, "worst": 1, "wisdom,": 1,
                "foolishness,": 1, "belief,": 1, "incredulity,": 1, "Light,": 1,
                "Darkness,": 1, "spring": 1, "hope,": 1, "winter": 1, "despair,": 1,
                "everything": 1, "nothing": 1, "to": 1, "Heaven,": 1, "other": 1, "way": 1
            }),
            tolerance: 0.0,
            strict:    true,
        })
        .build();
    Assertion::new(
        "rust_word_count",
        "Rust program counts words of /tmp/file.txt and prints JSON",
        Check::Program(check),
    )
}

/// Bash script renaming `merged_*` files in the directory it is given.
fn bash_renamer() -> Assertion {
    let fixtures = (0..10).flat_map(|i| {
        let contents = "a".repeat(i);
        [
            Fixture::new(format!("foo/merged_{i}"), contents.clone()),
            Fixture::new(format!("foo/{i}"), contents),
        ]
    });
    let check = ProgramCheck::builder()
        .toolchain(Toolchain::Bash)
        .fixtures(fixtures.collect())
        .args(vec!["{scratch}/foo/".to_string()])
        .inspect(vec!["ls".to_string(), "-1".to_string(), "{scratch}/foo".to_string()])
        .expect(Expectation::Contains {
            all_of:            (0..10).map(|i| format!("finished_{i}")).collect(),
            any_of:            Vec::new(),
            none_of:           vec!["merged_".into()],
            ignore_case:       false,
            ignore_whitespace: false,
        })
        .build();
    Assertion::new(
        "bash_renamer",
        "Bash script renames merged_* to finished_* in the given directory",
        Check::Program(check),
    )
}

/// Bash loop that converts only the PDFs without an existing text file.
fn bash_convert_not_overwrite() -> Assertion {
    let check = ProgramCheck::builder()
        .toolchain(Toolchain::Bash)
        .fixtures(vec![
            Fixture::new(
                "process.py",
                "import sys\nopen(sys.argv[2], 'w').write(open(sys.argv[1]).read())\n",
            ),
            Fixture::new("a.pdf", "hello1"),
            Fixture::new("b.pdf", "hello2"),
            Fixture::new("c.pdf", "hello3"),
            Fixture::new("txt/a.txt", "done1"),
            Fixture::new("txt/c.txt", "done3"),
        ])
        .inspect(vec![
            "bash".to_string(),
            "-c".to_string(),
            r#"for f in txt/*; do echo "$f=$(cat "$f")"; done"#.to_string(),
        ])
        .expect(Expectation::exact("txt/a.txt=done1\ntxt/b.txt=hello2\ntxt/c.txt=done3"))
        .build();
    Assertion::new(
        "bash_convert_not_overwrite",
        "Incremental conversion creates txt/b.txt and leaves existing files alone",
        Check::Program(check),
    )
}

/// Year to accuracy table extracted as JSON.
fn data_extraction_byyear() -> Assertion {
    Assertion::new(
        "data_extraction_byyear",
        "JSON of accuracy by year, graded per year",
        Check::Text {
            extract: ExtractPlan::raw(),
            expect:  Expectation::JsonSubset {
                expected:  json!({
                    "2024": 69.71,
                    "2023": 71.07,
                    "2022": 65.79,
                    "2021": 66.56,
                    "2020": 65.87,
                    "2019": 59.53,
                    "2018": 44.04
                }),
                tolerance: 0.01,
                strict:    false,
            },
        },
    )
}

/// Explanation of a prime-listing program, judged remotely.
fn explain_code_prime() -> Assertion {
    let criterion = JudgeCriterion::builder()
        .template(
            "I showed a student some code that calculates 20 primes. I then tested their \
             understanding by asking them to explain it to me. I'm going to show you their \
             answer, I want you to evaluate whether or not their answer says something to the \
             effect of \"it calculates the first 20 primes\". Do not judge their reasoning, just \
             tell me if they got it right.\nStudent Answer: \"{answer}\"\n\nThink out loud then \
             answer either \"The student passes\" or \"The student fails\".",
        )
        .marker("student passes")
        .ignore_case(true)
        .build();
    Assertion::new(
        "explain_code_prime",
        "Explanation says the code calculates the first 20 primes",
        Check::Judge(criterion),
    )
}

/// Security review that should spot an overly permissive IPv6 range.
fn aws_ipv6() -> Assertion {
    let criterion = JudgeCriterion::builder()
        .template(
            "Below is a software engineer's answer to a request to find an issue with the \
             following code: {answer}\n\nDoes the engineer mention overly permissive IPv6 \
             ranges? Think out loud, and then end your answer with either the string \"The issue \
             is found\" or \"The issue is not found\".",
        )
        .marker("The issue is found")
        .build();
    Assertion::new(
        "aws_ipv6",
        "Review flags the overly permissive IPv6 range",
        Check::Judge(criterion),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::assertion::GradeContext;

    #[test]
    fn names_are_unique() {
        let names: Vec<String> = builtin().into_iter().map(|a| a.name).collect();
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn find_returns_named_assertion() {
        assert_eq!(find("aws_ipv6").map(|a| a.name).as_deref(), Some("aws_ipv6"));
        assert!(find("no_such_assertion").is_none());
    }

    #[test]
    fn builtins_round_trip_through_json() {
        for assertion in builtin() {
            let text = serde_json::to_string(&assertion).expect("serialize");
            let back: Assertion = serde_json::from_str(&text).expect("deserialize");
            assert_eq!(back, assertion);
        }
    }

    #[tokio::test]
    async fn docker_cuda_names_both_literals_when_missing() {
        let verdict = find("docker_cuda")
            .expect("builtin")
            .grade("Reinstall Docker and try again.", &GradeContext::default())
            .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0.0);
        assert!(verdict.reason.contains("nvidia-container-toolkit"));
        assert!(verdict.reason.contains("nvidia-docker2"));
    }

    #[tokio::test]
    async fn byyear_gives_partial_credit() {
        let answer = "```json\n{\"2024\": 69.71, \"2023\": 71.07, \"2022\": 65.79, \"2021\": 66.56, \"2020\": 65.87, \"2019\": 59.53}\n```";
        let verdict = find("data_extraction_byyear")
            .expect("builtin")
            .grade(answer, &GradeContext::default())
            .await;
        assert!(!verdict.passed);
        assert!((verdict.score - 6.0 / 7.0).abs() < 1e-9);
        assert!(verdict.reason.contains("Missing `2018`"));
    }

    #[tokio::test]
    async fn weird_expression_reads_after_the_marker() {
        let assertion = find("c_weird_expression").expect("builtin");
        let ctx = GradeContext::default();
        assert!(assertion.grade("Let me think. FINAL ANSWER: * x + 2", &ctx).await.passed);
        assert!(!assertion.grade("v+2 maybe? Final answer: x+3", &ctx).await.passed);
    }

    #[tokio::test]
    async fn weird_expression_survives_case_changing_unicode() {
        let verdict = find("c_weird_expression")
            .expect("builtin")
            .grade("\u{130} Final answer:\u{e9}v+2 \u{2126}", &GradeContext::default())
            .await;
        assert!(verdict.passed, "{}", verdict.reason);
    }
}
