use serde::{Deserialize, Serialize};

/// Isolation strategy used to run code for a given language
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// In-process interpreter sandbox (embedded QuickJS)
    Interpreter,
    /// Disposable, network-disabled container
    Container,
}

/// The closed set of languages the platform evaluates
///
/// Each variant carries its source file name, its isolation strategy and its
/// default container image, so an unsupported language cannot slip through the
/// dispatch seam at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(alias = "js")]
    JavaScript,
    #[serde(alias = "ts")]
    TypeScript,
    #[serde(alias = "py")]
    Python,
    Java,
    #[serde(alias = "c++")]
    Cpp,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Python => "python",
            Self::Java => "java",
            Self::Cpp => "cpp",
        }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        match self {
            Self::JavaScript | Self::TypeScript => ExecutionStrategy::Interpreter,
            Self::Python | Self::Java | Self::Cpp => ExecutionStrategy::Container,
        }
    }

    /// Name of the source file materialized in the working directory
    ///
    /// Java requires the file name to match the public class, so submissions
    /// must declare `class Main`.
    pub fn source_file_name(&self) -> &'static str {
        match self {
            Self::JavaScript => "main.js",
            Self::TypeScript => "main.ts",
            Self::Python => "main.py",
            Self::Java => "Main.java",
            Self::Cpp => "main.cpp",
        }
    }

    /// Default container image for the container strategy
    pub fn default_image(&self) -> &'static str {
        match self {
            Self::Python => "python:3.11-alpine",
            Self::Java => "eclipse-temurin:17-jdk",
            Self::Cpp => "gcc:13",
            // Interpreter languages never reach the container strategy
            Self::JavaScript | Self::TypeScript => "",
        }
    }
}
