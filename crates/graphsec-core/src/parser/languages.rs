//! Language table driving detection and the native parser.

use tree_sitter::Language;

/// How a language is parsed natively.
#[derive(Clone, Copy)]
pub enum Grammar {
    TreeSitter(fn() -> Language),
    Syn,
    /// Detected but not parsed.
    None,
}

/// Node kinds a tree-sitter grammar uses for the constructs we extract.
#[derive(Clone, Copy)]
pub struct LanguageSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub grammar: Grammar,
    pub class_kinds: &'static [&'static str],
    pub function_kinds: &'static [&'static str],
    pub method_kinds: &'static [&'static str],
    /// Call nodes, with the field holding the callee.
    pub call_kinds: &'static [(&'static str, &'static str)],
    /// Declarator nodes binding a name to a function value (`const f = () => {}`).
    pub binding_kinds: &'static [&'static str],
}

fn python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

fn javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

fn typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}

fn tsx() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}

fn go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

fn java() -> Language {
    tree_sitter_java::LANGUAGE.into()
}

fn csharp() -> Language {
    tree_sitter_c_sharp::LANGUAGE.into()
}

const JS_CLASSES: &[&str] = &["class_declaration", "class", "abstract_class_declaration", "interface_declaration"];
const JS_FUNCTIONS: &[&str] = &["function_declaration", "generator_function_declaration"];
const JS_METHODS: &[&str] = &["method_definition"];
const JS_CALLS: &[(&str, &str)] = &[("call_expression", "function"), ("new_expression", "constructor")];
const JS_BINDINGS: &[&str] = &["variable_declarator"];

const NONE: &[&str] = &[];
const NO_CALLS: &[(&str, &str)] = &[];

const fn detect_only(name: &'static str, extensions: &'static [&'static str]) -> LanguageSpec {
    LanguageSpec {
        name,
        extensions,
        grammar: Grammar::None,
        class_kinds: NONE,
        function_kinds: NONE,
        method_kinds: NONE,
        call_kinds: NO_CALLS,
        binding_kinds: NONE,
    }
}

/// Known languages, in lookup order.
pub static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        name: "python",
        extensions: &["py", "pyi"],
        grammar: Grammar::TreeSitter(python),
        class_kinds: &["class_definition"],
        function_kinds: &["function_definition"],
        method_kinds: NONE,
        call_kinds: &[("call", "function")],
        binding_kinds: NONE,
    },
    LanguageSpec {
        name: "javascript",
        extensions: &["js", "jsx", "mjs", "cjs"],
        grammar: Grammar::TreeSitter(javascript),
        class_kinds: JS_CLASSES,
        function_kinds: JS_FUNCTIONS,
        method_kinds: JS_METHODS,
        call_kinds: JS_CALLS,
        binding_kinds: JS_BINDINGS,
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["ts", "mts", "cts"],
        grammar: Grammar::TreeSitter(typescript),
        class_kinds: JS_CLASSES,
        function_kinds: JS_FUNCTIONS,
        method_kinds: JS_METHODS,
        call_kinds: JS_CALLS,
        binding_kinds: JS_BINDINGS,
    },
    LanguageSpec {
        name: "tsx",
        extensions: &["tsx"],
        grammar: Grammar::TreeSitter(tsx),
        class_kinds: JS_CLASSES,
        function_kinds: JS_FUNCTIONS,
        method_kinds: JS_METHODS,
        call_kinds: JS_CALLS,
        binding_kinds: JS_BINDINGS,
    },
    LanguageSpec {
        name: "go",
        extensions: &["go"],
        grammar: Grammar::TreeSitter(go),
        class_kinds: &["type_spec"],
        function_kinds: &["function_declaration"],
        method_kinds: &["method_declaration"],
        call_kinds: &[("call_expression", "function")],
        binding_kinds: NONE,
    },
    LanguageSpec {
        name: "java",
        extensions: &["java"],
        grammar: Grammar::TreeSitter(java),
        class_kinds: &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "record_declaration",
        ],
        function_kinds: NONE,
        method_kinds: &["method_declaration", "constructor_declaration"],
        call_kinds: &[("method_invocation", "name"), ("object_creation_expression", "type")],
        binding_kinds: NONE,
    },
    LanguageSpec {
        name: "csharp",
        extensions: &["cs"],
        grammar: Grammar::TreeSitter(csharp),
        class_kinds: &[
            "class_declaration",
            "interface_declaration",
            "struct_declaration",
            "record_declaration",
        ],
        function_kinds: &["local_function_statement"],
        method_kinds: &["method_declaration", "constructor_declaration"],
        call_kinds: &[("invocation_expression", "function"), ("object_creation_expression", "type")],
        binding_kinds: NONE,
    },
    LanguageSpec {
        name: "rust",
        extensions: &["rs"],
        grammar: Grammar::Syn,
        class_kinds: NONE,
        function_kinds: NONE,
        method_kinds: NONE,
        call_kinds: NO_CALLS,
        binding_kinds: NONE,
    },
    detect_only("c", &["c", "h"]),
    detect_only("cpp", &["cpp", "cc", "cxx", "hpp", "hh"]),
    detect_only("ruby", &["rb"]),
    detect_only("php", &["php"]),
    detect_only("kotlin", &["kt", "kts"]),
    detect_only("swift", &["swift"]),
    detect_only("shell", &["sh", "bash", "zsh"]),
    detect_only("markdown", &["md", "markdown"]),
];

/// Table entry for a language name.
pub fn spec_for(name: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES.iter().find(|l| l.name == name)
}

/// Detect a language from a path's extension.
pub fn language_for_path(path: &str) -> Option<&'static LanguageSpec> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|l| l.extensions.iter().any(|e| *e == ext))
}
