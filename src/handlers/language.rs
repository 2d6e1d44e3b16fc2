/// Language tag for a staged filename, for editor syntax highlighting.
/// Unknown extensions fall back to plain text.
pub fn language_for_filename(filename: &str) -> &'static str {
    if filename == "Dockerfile" || filename == "dockerfile" {
        return "dockerfile";
    }
    let ext = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => return "plaintext",
    };
    language_for_extension(&ext)
}

fn language_for_extension(ext: &str) -> &'static str {
    match ext {
        "abap" => "abap",
        "bat" | "cmd" => "bat",
        "bicep" => "bicep",
        "c" => "c",
        "mligo" => "cameligo",
        "clj" | "cljs" | "cljc" => "clojure",
        "coffee" | "iced" => "coffeescript",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "css" => "css",
        "dart" => "dart",
        "dockerfile" => "dockerfile",
        "ecl" => "ecl",
        "ex" | "exs" => "elixir",
        "fs" | "fsi" | "fsx" => "fsharp",
        "go" => "go",
        "graphql" | "gql" => "graphql",
        "hbs" | "handlebars" => "handlebars",
        "hcl" | "tf" => "hcl",
        "html" | "htm" => "html",
        "ini" => "ini",
        "java" => "java",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "json" | "jsonc" => "json",
        "jl" => "julia",
        "kt" | "kts" => "kotlin",
        "less" => "less",
        "liquid" => "liquid",
        "lua" => "lua",
        "md" | "markdown" => "markdown",
        "pas" | "pp" => "pascal",
        "pl" | "pm" => "perl",
        "php" | "phtml" | "inc" => "php",
        "txt" => "plaintext",
        "ps1" | "psm1" | "psd1" => "powershell",
        "proto" => "proto",
        "pug" | "jade" => "pug",
        "py" | "pyw" | "pyi" => "python",
        "qs" => "qsharp",
        "r" | "rmd" => "r",
        "cshtml" | "vbhtml" => "razor",
        "rst" => "restructuredtext",
        "rb" | "erb" | "rake" => "ruby",
        "rs" => "rust",
        "scala" | "sc" => "scala",
        "scm" | "ss" => "scheme",
        "scss" => "scss",
        "sh" | "bash" => "shell",
        "sol" => "sol",
        "rq" | "sparql" => "sparql",
        "sql" => "sql",
        "st" => "st",
        "swift" => "swift",
        "sv" | "svh" => "systemverilog",
        "tcl" => "tcl",
        "twig" => "twig",
        "ts" | "tsx" => "typescript",
        "vb" => "vb",
        "v" | "vh" => "verilog",
        "xml" | "xsd" | "xsl" => "xml",
        "yaml" | "yml" => "yaml",
        _ => "plaintext",
    }
}
