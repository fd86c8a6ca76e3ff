#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # C Preprocessor Library
//!
//! A standalone C preprocessor: macro expansion with full stringize,
//! token-paste and recursive-expansion blocking, conditional
//! compilation, nested includes, and the `#if` constant-expression
//! evaluator. Output is the expanded, directive-free token stream,
//! interleaved with `# <line> "<file>"` linemarkers so a downstream
//! compiler can recover original source positions.
//!
//! ## Features
//!
//! - Object-like, function-like and variadic macros, with GNU
//!   `, ## __VA_ARGS__` comma elision
//! - Hygienic rescanning: self-referential and mutually recursive
//!   macros terminate, exactly as the standard requires
//! - Conditional compilation (`#if`, `#ifdef`, `#elif`, `#else`,
//!   `#endif`) with signed/unsigned-correct expression evaluation
//! - Include processing over search directories or a custom resolver,
//!   `#include_next`, `#pragma once`
//! - Alternate output forms: linemarker-free text and Makefile
//!   dependency rules
//!
//! ## Example
//!
//! ```rust,no_run
//! use expandium::{preprocess_source, PreprocessorConfig};
//!
//! let code = r#"
//! #define GREETING "hello"
//! const char *s = GREETING;
//! "#;
//!
//! let config = PreprocessorConfig::new().with_linemarkers(false);
//! let result = preprocess_source(code, &config).unwrap();
//! println!("{}", result);
//! ```

mod config;
mod date_time;
mod directive;
mod driver;
mod error;
mod expand;
mod expr;
mod hideset;
mod lexer;
mod macro_def;
mod output;
mod source;
mod token;

pub use config::{
    IncludeContext, IncludeKind, IncludeResolver, IntWidth, OutputMode, PreprocessorConfig,
    ResolvedInclude, WarningHandler,
};
pub use driver::Preprocessor;
pub use error::PreprocessError;
pub use macro_def::Macro;

use std::path::Path;

/// Preprocess source text with the given configuration.
///
/// # Errors
/// Returns `PreprocessError` if the input has malformed directives,
/// unterminated constructs, failed includes, or the macro recursion
/// ceiling is exceeded.
pub fn preprocess_source<S: AsRef<str>>(
    input: S,
    config: &PreprocessorConfig,
) -> Result<String, PreprocessError> {
    let mut pp = Preprocessor::with_config(config);
    pp.process_source("<stdin>", input.as_ref())
}

/// Preprocess a file and return the result as a string.
///
/// # Errors
/// Returns `PreprocessError` if the file cannot be read or if
/// preprocessing fails.
pub fn preprocess_file<P: AsRef<Path>>(
    input_path: P,
    config: &PreprocessorConfig,
) -> Result<String, PreprocessError> {
    let mut pp = Preprocessor::with_config(config);
    pp.process_file(input_path)
}

/// Preprocess a file and write the result to another file.
///
/// # Errors
/// Returns `PreprocessError` if the input cannot be read, the output
/// cannot be written, or preprocessing fails.
pub fn preprocess_file_to<P: AsRef<Path>>(
    input_path: P,
    output_path: P,
    config: &PreprocessorConfig,
) -> Result<(), PreprocessError> {
    let output = preprocess_file(&input_path, config)?;
    std::fs::write(output_path, output)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn run(src: &str) -> String {
        run_cfg(src, PreprocessorConfig::new().with_linemarkers(false))
    }

    fn run_cfg(src: &str, cfg: PreprocessorConfig) -> String {
        Preprocessor::with_config(&cfg)
            .process_source("test.c", src)
            .unwrap()
    }

    fn try_run(src: &str) -> Result<String, PreprocessError> {
        Preprocessor::with_config(&PreprocessorConfig::new().with_linemarkers(false))
            .process_source("test.c", src)
    }

    #[test]
    fn simple_object_macro() {
        let out = run("#define PI 3.14\nfloat x = PI;\n");
        assert!(out.contains("float x = 3.14;"));
    }

    #[test]
    fn function_like_macro() {
        let out = run("#define ADD(a, b) ((a)+(b))\nint z = ADD(1, 2);\n");
        assert!(out.contains("((1)+(2))"));
    }

    #[test]
    fn non_macro_text_is_untouched() {
        let src = "int main(void) {\n\treturn 0; /* done */\n}\n";
        let out = run(src);
        assert_eq!(out, "int main(void) {\n\treturn 0;  \n}\n");
    }

    #[test]
    fn function_like_name_without_parens_stays() {
        let out = run("#define F(x) x\nint (*p)() = F;\n");
        assert!(out.contains("= F;"));
    }

    #[test]
    fn self_reference_does_not_loop() {
        let out = run("#define A A\nA\n");
        assert_eq!(out.trim(), "A");
    }

    #[test]
    fn mutual_recursion_stops_after_one_cycle() {
        let out = run("#define A B\n#define B A\nA\n");
        assert_eq!(out.trim(), "A");
    }

    #[test]
    fn argument_is_expanded_before_substitution() {
        let out = run("#define ID(x) x\n#define FOO 1+1\nID(FOO)\n");
        assert_eq!(out.trim(), "1+1");
    }

    #[test]
    fn stringize_escapes_and_collapses() {
        let out = run("#define S(x) #x\nS(a  \"quoted\"   b)\n");
        assert_eq!(out.trim(), r#""a \"quoted\" b""#);
    }

    #[test]
    fn stringize_uses_raw_argument() {
        // FOO must not be expanded under #
        let out = run("#define FOO 42\n#define S(x) #x\nS(FOO)\n");
        assert_eq!(out.trim(), "\"FOO\"");
    }

    #[test]
    fn paste_forms_one_token() {
        let out = run("#define P(a,b) a##b\nP(1,2)\n");
        assert_eq!(out.trim(), "12");
    }

    #[test]
    fn paste_suppresses_argument_expansion() {
        let out = run("#define ONE 1\n#define P(a,b) a##b\nP(ONE,2)\n");
        assert_eq!(out.trim(), "ONE2");
    }

    #[test]
    fn paste_at_replacement_edge_is_rejected() {
        assert!(try_run("#define P(a) ##a\n").is_err());
        assert!(try_run("#define P(a) a##\n").is_err());
    }

    #[test]
    fn failed_paste_keeps_fragments() {
        let out = run("#define MAKE_ASSIGN(op) = ## op\nint x MAKE_ASSIGN(+) 5;\n");
        assert!(out.contains("=+"));
    }

    #[test]
    fn paste_with_empty_argument() {
        let out = run("#define P(a,b) a##b\nP(,x)\nP(x,)\n");
        assert_eq!(out.trim(), "x\nx");
    }

    #[test]
    fn chained_paste() {
        let out = run("#define P3(a,b,c) a##b##c\nP3(_,x,_)\n");
        assert_eq!(out.trim(), "_x_");
    }

    #[test]
    fn variadic_comma_elision() {
        let src = "#define V(fmt, ...) f(fmt, ##__VA_ARGS__)\nV(\"x\")\nV(\"x\", 1)\n";
        let out = run(src);
        assert!(out.contains("f(\"x\")"));
        assert!(out.contains("f(\"x\",1)"));
    }

    #[test]
    fn variadic_tail_joins_arguments() {
        let out = run("#define V(...) g(__VA_ARGS__)\nV(1, 2, 3)\n");
        assert_eq!(out.trim(), "g(1, 2, 3)");
    }

    #[test]
    fn rescan_across_splice_boundary() {
        let out = run("#define F() G\n#define G() done\nF()()\n");
        assert_eq!(out.trim(), "done");
    }

    #[test]
    fn invocation_spans_lines() {
        let out = run("#define ADD(a,b) a+b\nADD(1,\n2)\n");
        assert!(out.contains("1+2"));
    }

    #[test]
    fn directive_inside_argument_list() {
        let src = "#define SEL(a,b) a|b\nSEL(1,\n#ifdef W\n2\n#else\n3\n#endif\n)\n";
        let out = run(src);
        assert!(out.contains("1|3"));
    }

    #[test]
    fn wrong_argument_count_is_fatal() {
        assert!(try_run("#define M(a,b) a\nM(1)\n").is_err());
        assert!(try_run("#define M(a) a\nM(1,2)\n").is_err());
    }

    #[test]
    fn unterminated_argument_list_is_fatal() {
        assert!(try_run("#define M(a) a\nM(1\n").is_err());
    }

    #[test]
    fn conditional_selects_one_branch() {
        let src = "#define LEVEL 2\n#if LEVEL == 1\nint x = 1;\n#elif LEVEL == 2\nint x = 2;\n#else\nint x = 3;\n#endif\n";
        let out = run(src);
        assert!(out.contains("int x = 2;"));
        assert!(!out.contains("int x = 1;"));
        assert!(!out.contains("int x = 3;"));
    }

    #[test]
    fn nested_conditionals_stay_balanced() {
        let src = "#if 0\n#if 1\ninner\n#endif\nhidden\n#endif\nshown\n";
        let out = run(src);
        assert!(!out.contains("inner"));
        assert!(!out.contains("hidden"));
        assert!(out.contains("shown"));
    }

    #[test]
    fn elif_after_taken_branch_is_skipped() {
        let src = "#if 1\na\n#elif 1\nb\n#else\nc\n#endif\n";
        let out = run(src);
        assert!(out.contains('a') && !out.contains('b') && !out.contains('c'));
    }

    #[test]
    fn else_after_else_is_an_error() {
        assert!(try_run("#if 0\n#else\n#else\n#endif\n").is_err());
    }

    #[test]
    fn elif_after_else_is_an_error() {
        assert!(try_run("#if 0\n#else\n#elif 1\n#endif\n").is_err());
    }

    #[test]
    fn unmatched_endif_is_an_error() {
        assert!(try_run("#endif\n").is_err());
    }

    #[test]
    fn missing_endif_is_an_error() {
        assert!(try_run("#if 1\nx\n").is_err());
    }

    #[test]
    fn untaken_branch_is_not_evaluated() {
        let src = "#if 0\n#if 1/0\n#endif\n#endif\nok\n";
        assert_eq!(run(src).trim(), "ok");
    }

    #[test]
    fn division_by_zero_in_live_branch_errors() {
        assert!(try_run("#if 1/0\n#endif\n").is_err());
    }

    #[test]
    fn defined_operator_both_forms() {
        let src = "#define X 1\n#if defined X && defined(X) && !defined(Y)\nyes\n#endif\n";
        assert_eq!(run(src).trim(), "yes");
    }

    #[test]
    fn shift_signedness_follows_width() {
        let src = "#if (1 << 31) < 0\nnarrow\n#else\nwide\n#endif\n";
        let out32 = run_cfg(
            src,
            PreprocessorConfig::new()
                .with_linemarkers(false)
                .with_int_width(IntWidth::Bits32),
        );
        assert_eq!(out32.trim(), "narrow");
        assert_eq!(run(src).trim(), "wide");
    }

    #[test]
    fn undef_clears_a_macro() {
        let out = run("#define FOO 1\n#undef FOO\nint x = FOO;\n");
        assert!(out.contains("FOO"));
    }

    #[test]
    fn identical_redefinition_is_silent() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let warnings: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = Rc::clone(&warnings);
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_warning_handler(Rc::new(move |msg: &str| {
                sink.borrow_mut().push(msg.to_string());
            }));
        run_cfg("#define M(x) x + 1\n#define M(x)  x  +  1\n", cfg);
        assert!(warnings.borrow().is_empty());
    }

    #[test]
    fn changed_redefinition_warns_and_replaces() {
        use std::cell::RefCell;
        use std::rc::Rc;
        let warnings: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = Rc::clone(&warnings);
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_warning_handler(Rc::new(move |msg: &str| {
                sink.borrow_mut().push(msg.to_string());
            }));
        let out = run_cfg("#define M 1\n#define M 2\nM\n", cfg);
        assert_eq!(out.trim(), "2");
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("redefined"));
    }

    #[test]
    fn warnings_as_errors_is_fatal() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_warnings_as_errors(true);
        let result = Preprocessor::with_config(&cfg).process_source("t.c", "#define M 1\n#define M 2\n");
        assert!(result.is_err());
    }

    #[test]
    fn error_directive_in_live_text() {
        assert!(try_run("#error boom\n").is_err());
        assert!(try_run("#if 0\n#error boom\n#endif\nok\n").is_ok());
    }

    #[test]
    fn line_directive_renumbers() {
        let out = run("#line 100\nint l = __LINE__;\n");
        assert!(out.contains("int l = 100;"));
    }

    #[test]
    fn line_directive_renames_file() {
        let out = run("#line 7 \"other.c\"\nconst char *f = __FILE__;\n");
        assert!(out.contains("\"other.c\""));
    }

    #[test]
    fn builtin_line_and_file() {
        let out = run("int l = __LINE__;\nconst char *f = __FILE__;\n");
        assert!(out.contains("int l = 1;"));
        assert!(out.contains("\"test.c\""));
    }

    #[test]
    fn counter_is_monotonic() {
        let out = run("__COUNTER__ __COUNTER__ __COUNTER__\n");
        assert_eq!(out.trim(), "0 1 2");
    }

    #[test]
    fn include_through_resolver() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_include_resolver(|path, _kind, _ctx| {
                (path == "inc.h").then(|| ResolvedInclude {
                    path: "inc.h".to_string(),
                    text: "#define FOO 42\n".to_string(),
                })
            });
        let out = run_cfg("#include \"inc.h\"\nint x = FOO;\n", cfg);
        assert!(out.contains("int x = 42;"));
    }

    #[test]
    fn include_cycle_is_fatal() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_include_resolver(|path, _kind, _ctx| {
                (path == "loop.h").then(|| ResolvedInclude {
                    path: "loop.h".to_string(),
                    text: "#include \"loop.h\"\n".to_string(),
                })
            });
        let result =
            Preprocessor::with_config(&cfg).process_source("t.c", "#include \"loop.h\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn pragma_once_includes_once() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_include_resolver(|path, _kind, _ctx| {
                (path == "once.h").then(|| ResolvedInclude {
                    path: "once.h".to_string(),
                    text: "#pragma once\nint marker;\n".to_string(),
                })
            });
        let out = run_cfg("#include \"once.h\"\n#include \"once.h\"\n", cfg);
        assert_eq!(out.matches("int marker;").count(), 1);
    }

    #[test]
    fn pragma_lines_pass_through() {
        let out = run("#pragma pack(1)\n");
        assert!(out.contains("#pragma pack(1)"));
    }

    #[test]
    fn computed_include_target() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_include_resolver(|path, _kind, _ctx| {
                (path == "real.h").then(|| ResolvedInclude {
                    path: "real.h".to_string(),
                    text: "got_it\n".to_string(),
                })
            });
        let out = run_cfg("#define HDR \"real.h\"\n#include HDR\n", cfg);
        assert!(out.contains("got_it"));
    }

    #[test]
    fn linemarkers_track_includes() {
        let cfg = PreprocessorConfig::new().with_include_resolver(|path, _kind, _ctx| {
            (path == "inc.h").then(|| ResolvedInclude {
                path: "inc.h".to_string(),
                text: "in_header\n".to_string(),
            })
        });
        let out = run_cfg("top\n#include \"inc.h\"\nafter\n", cfg);
        assert!(out.contains("# 1 \"test.c\""));
        assert!(out.contains("# 1 \"inc.h\""));
        assert!(out.contains("# 3 \"test.c\""));
    }

    #[test]
    fn dependency_mode_lists_opened_files() {
        let cfg = PreprocessorConfig::new()
            .with_output(OutputMode::Dependencies)
            .with_include_resolver(|path, _kind, _ctx| {
                (path == "dep.h").then(|| ResolvedInclude {
                    path: "dep.h".to_string(),
                    text: "x\n".to_string(),
                })
            });
        let out = run_cfg("#include \"dep.h\"\nbody\n", cfg);
        assert_eq!(out, "test.o: test.c dep.h\n");
    }

    #[test]
    fn include_search_and_include_next() {
        let base = std::env::temp_dir().join(format!("expandium-inc-{}", std::process::id()));
        let d1 = base.join("first");
        let d2 = base.join("second");
        std::fs::create_dir_all(&d1).unwrap();
        std::fs::create_dir_all(&d2).unwrap();
        std::fs::write(d1.join("h.h"), "first_marker\n#include_next <h.h>\n").unwrap();
        std::fs::write(d2.join("h.h"), "second_marker\n").unwrap();

        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .system_include_dir(&d1)
            .system_include_dir(&d2);
        let out = run_cfg("#include <h.h>\n", cfg);
        assert!(out.contains("first_marker"));
        assert!(out.contains("second_marker"));

        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn missing_include_is_fatal() {
        assert!(try_run("#include \"no/such/file.h\"\n").is_err());
    }

    #[test]
    fn include_depth_guards_runaway_nesting() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_include_resolver(|path, _kind, _ctx| {
                let n: usize = path
                    .strip_prefix("gen")
                    .and_then(|s| s.strip_suffix(".h"))
                    .and_then(|s| s.parse().ok())?;
                Some(ResolvedInclude {
                    path: path.to_string(),
                    text: format!("#include \"gen{}.h\"\n", n + 1),
                })
            });
        let result = Preprocessor::with_config(&cfg).process_source("t.c", "#include \"gen0.h\"\n");
        assert!(matches!(result, Err(PreprocessError::IncludeDepth { .. })));
    }

    #[test]
    fn unknown_directive_is_fatal_by_default() {
        assert!(try_run("#wibble foo\n").is_err());
    }

    #[test]
    fn tolerant_mode_passes_unknown_directives() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_tolerant_directives(true);
        let out = run_cfg("#wibble foo\n", cfg);
        assert!(out.contains("#wibble foo"));
    }

    #[test]
    fn null_directive_and_marker_style_line() {
        let out = run("#\n# 42 \"renamed.c\"\nint l = __LINE__;\n");
        assert!(out.contains("int l = 42;"));
    }

    #[test]
    fn ident_directive_is_dropped() {
        let out = run("#ident \"$Id$\"\nrest\n");
        assert!(!out.contains("$Id$"));
        assert!(out.contains("rest"));
    }

    #[test]
    fn comments_kept_on_request() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .with_comments(true);
        let out = run_cfg("a /*keep*/ b\n", cfg);
        assert!(out.contains("/*keep*/"));
    }

    #[test]
    fn trigraphs_and_splices_feed_directives() {
        let out = run("??=define X 9\nX\n");
        assert_eq!(out.trim(), "9");
    }

    #[test]
    fn spliced_macro_definition() {
        let out = run("#define SUM 1 + \\\n2\nSUM\n");
        assert_eq!(out.trim(), "1 + 2");
    }

    #[test]
    fn predefines_from_config() {
        let cfg = PreprocessorConfig::new()
            .with_linemarkers(false)
            .define("N=3")
            .define("FLAG");
        let out = run_cfg("#if FLAG\nint n = N;\n#endif\n", cfg);
        assert!(out.contains("int n = 3;"));
    }

    #[test]
    fn recursion_ceiling_is_fatal() {
        let mut src = String::new();
        for i in 0..200 {
            src.push_str(&format!("#define L{} L{}\n", i, i + 1));
        }
        src.push_str("#define L200 end\nL0\n");
        assert!(try_run(&src).is_err());
    }

    #[test]
    fn session_api_surface() {
        let mut pp = Preprocessor::new();
        pp.define("ANSWER=42").unwrap();
        assert!(pp.is_defined("ANSWER"));
        assert!(pp.macros().contains_key("ANSWER"));
        pp.undef("ANSWER");
        assert!(!pp.is_defined("ANSWER"));
    }
}
