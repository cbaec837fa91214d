// Copyright 2026 Lectern Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "lectern",
    version,
    about = "Retrieval-augmented context for per-user document collections"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new store
    Init {
        /// Directory to create the store in
        path: Option<PathBuf>,
    },

    /// Upload documents for a user
    Add(AddArgs),

    /// List a user's documents
    Ls(LsArgs),

    /// Remove documents and their chunks
    Rm(RmArgs),

    /// Rank chunks against a question
    Search(SearchArgs),

    /// Build the context and citations for a question
    Ask(AskArgs),

    /// Show store stats
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Export the store as JSONL
    Export(ExportArgs),

    /// Import a JSONL export
    Import(ImportArgs),

    /// Print shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct OwnerArgs {
    /// Owner of the documents
    #[arg(long)]
    pub user: String,

    /// Restrict to one subject
    #[arg(long)]
    pub subject: Option<String>,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Files or directories to add
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub owner: OwnerArgs,

    /// Glob to include
    #[arg(long)]
    pub glob: Option<String>,

    /// Ignore globs
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    #[command(flatten)]
    pub owner: OwnerArgs,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RmArgs {
    /// File ids to remove
    #[arg(required = true)]
    pub file_ids: Vec<String>,

    /// Owner of the documents
    #[arg(long)]
    pub user: String,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Question text
    pub query: String,

    #[command(flatten)]
    pub owner: OwnerArgs,

    /// Top-k results (defaults to top_k from config)
    #[arg(long)]
    pub k: Option<usize>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Question text
    pub query: String,

    #[command(flatten)]
    pub owner: OwnerArgs,

    /// Top-k chunks (defaults to top_k from config)
    #[arg(long)]
    pub k: Option<usize>,

    /// Context size in chars (defaults to max_context_length from config)
    #[arg(long)]
    pub max_context: Option<usize>,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file (defaults to stdout)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Only export this user's documents
    #[arg(long)]
    pub user: Option<String>,

    /// Output JSON stats (requires --out)
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Input file (JSONL)
    pub path: PathBuf,

    /// Output JSON stats
    #[arg(long)]
    pub json: bool,
}
