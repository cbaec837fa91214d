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
use std::time::Instant;

use anyhow::Context as _;
use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use lectern::cli::AddArgs;
use lectern::cli::AskArgs;
use lectern::cli::Cli;
use lectern::cli::Commands;
use lectern::cli::ExportArgs;
use lectern::cli::ImportArgs;
use lectern::cli::LsArgs;
use lectern::cli::OwnerArgs;
use lectern::cli::RmArgs;
use lectern::cli::SearchArgs;
use lectern::config::Config;
use lectern::config::ConfigCtx;
use lectern::config::load_global_config;
use lectern::context::Reply;
use lectern::embed::build_embedder;
use lectern::ingest;
use lectern::model::Scope;
use lectern::output::JsonResponse;
use lectern::output::StatsOut;
use lectern::output::print_json;
use lectern::retrieve::Retrieval;
use lectern::retrieve::Retriever;
use lectern::score::build_scorer;
use lectern::store::Store;
use lectern::store::StoreMode;
use lectern::transfer;
use tracing::level_filters::LevelFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Add(args) => {
            let json = args.json;
            handle_result(cmd_add(args), json)
        }
        Commands::Ls(args) => {
            let json = args.json;
            handle_result(cmd_ls(args), json)
        }
        Commands::Rm(args) => {
            let json = args.json;
            handle_result(cmd_rm(args), json)
        }
        Commands::Search(args) => {
            let json = args.json;
            handle_result(cmd_search(args), json)
        }
        Commands::Ask(args) => {
            let json = args.json;
            handle_result(cmd_ask(args), json)
        }
        Commands::Stats { json } => handle_result(cmd_stats(json), json),
        Commands::Export(args) => {
            let json = args.json;
            handle_result(cmd_export(args), json)
        }
        Commands::Import(args) => {
            let json = args.json;
            handle_result(cmd_import(args), json)
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "lectern", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_result(result: Result<()>, json: bool) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if json {
                let message = format!("{err:#}");
                let mut resp = JsonResponse::error(error_code(&message), &message);
                if message.contains("store not found") {
                    resp = resp.with_hint("run `lectern init` first");
                }
                print_json(&resp)?;
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

fn error_code(message: &str) -> &'static str {
    if message.contains("invalid configuration") {
        "invalid_configuration"
    } else if message.contains("store not found") {
        "store_missing"
    } else if message.contains("locked") {
        "store_locked"
    } else {
        "error"
    }
}

fn scope_of(owner: &OwnerArgs) -> Scope {
    Scope::user(owner.user.clone()).with_subject(owner.subject.clone())
}

fn open_store(mode: StoreMode) -> Result<(ConfigCtx, Store)> {
    let ctx = ConfigCtx::load_from_cwd()?;
    let store = Store::open(&ctx.store_path(), mode)?;
    Ok((ctx, store))
}

fn cmd_init(path: Option<PathBuf>) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&root).with_context(|| format!("create dir {root:?}"))?;

    let config = load_global_config()?;
    let store_path = if config.store_path.is_absolute() {
        config.store_path.clone()
    } else {
        root.join(&config.store_path)
    };
    Store::init(&store_path)?;

    println!("Initialized lectern store at {}", store_path.display());
    Ok(())
}

fn cmd_add(args: AddArgs) -> Result<()> {
    let (ctx, store) = open_store(StoreMode::ReadWrite)?;
    let chunker = ctx.config.chunker()?;
    let embedder = if ctx.config.uses_vectors() {
        let embedder = build_embedder(&ctx.config)?;
        tracing::debug!(dim = embedder.dim(), "embedding chunks on upload");
        Some(embedder)
    } else {
        None
    };

    let opts = ingest::IngestOptions {
        user_id: args.owner.user,
        subject_id: args.owner.subject,
        glob: args.glob,
        ignore: args.ignore,
    };
    let report = ingest::ingest_paths(&store, &chunker, embedder.as_deref(), args.paths, &opts)?;
    tracing::info!(
        docs = report.docs_added,
        chunks = report.chunks_added,
        "ingest finished"
    );

    if args.json {
        let scope = Scope::user(opts.user_id.clone()).with_subject(opts.subject_id.clone());
        let added: Vec<_> = store
            .list_documents(&scope)?
            .into_iter()
            .filter(|doc| report.file_ids.contains(&doc.file_id))
            .collect();
        let resp = JsonResponse::ok()
            .with_documents(added)
            .with_stats(StatsOut {
                total_hits: report.docs_added as i64,
                doc_count: Some(report.docs_added as i64),
                chunk_count: Some(report.chunks_added as i64),
                ..Default::default()
            })
            .with_warnings(report.warnings);
        print_json(&resp)?;
    } else {
        println!(
            "Added {} docs ({} chunks, {} replaced)",
            report.docs_added, report.chunks_added, report.replaced
        );
        for warn in report.warnings {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

fn cmd_ls(args: LsArgs) -> Result<()> {
    let (_ctx, store) = open_store(StoreMode::ReadOnly)?;
    let documents = store.list_documents(&scope_of(&args.owner))?;

    if args.json {
        let resp = JsonResponse::ok()
            .with_stats(StatsOut {
                total_hits: documents.len() as i64,
                ..Default::default()
            })
            .with_documents(documents);
        print_json(&resp)?;
    } else {
        for doc in &documents {
            println!(
                "{}  {}  {}  {} chunks  {}",
                doc.file_id,
                doc.filename,
                doc.subject_id.as_deref().unwrap_or("-"),
                doc.chunk_count,
                doc.uploaded_at
            );
        }
    }
    Ok(())
}

fn cmd_rm(args: RmArgs) -> Result<()> {
    let (_ctx, store) = open_store(StoreMode::ReadWrite)?;
    let mut removed = 0usize;
    let mut warnings = Vec::new();
    for file_id in &args.file_ids {
        if store.delete_document(&args.user, file_id)? {
            removed += 1;
        } else {
            warnings.push(format!("no document {file_id} owned by {}", args.user));
        }
    }

    if args.json {
        let resp = JsonResponse::ok()
            .with_stats(StatsOut {
                total_hits: removed as i64,
                ..Default::default()
            })
            .with_warnings(warnings);
        print_json(&resp)?;
    } else {
        println!("Removed {removed} docs");
        for warn in warnings {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

/// Retrieval for `search` and `ask`. An unreachable scoring backend
/// degrades instead of failing the command.
fn retrieve(
    store: &Store,
    config: &Config,
    query: &str,
    scope: &Scope,
    top_k: usize,
) -> Result<Retrieval> {
    let scorer = match build_scorer(config) {
        Ok(scorer) => scorer,
        Err(err) if err.is_backend_unavailable() => {
            return Ok(Retrieval::degraded(err.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    tracing::debug!(scorer = scorer.name(), top_k, "retrieving");
    let retrieval = Retriever::new(store, &*scorer).retrieve(query, scope, top_k);
    if let Some(reason) = &retrieval.reason {
        tracing::warn!(%reason, "retrieval degraded");
    }
    Ok(retrieval)
}

fn degraded_warnings(retrieval: &Retrieval) -> Vec<String> {
    retrieval
        .reason
        .iter()
        .map(|reason| format!("retrieval degraded: {reason}"))
        .collect()
}

fn cmd_search(args: SearchArgs) -> Result<()> {
    let (ctx, store) = open_store(StoreMode::ReadOnly)?;
    let scope = scope_of(&args.owner);
    let top_k = args.k.unwrap_or(ctx.config.top_k);
    let started = Instant::now();
    let retrieval = retrieve(&store, &ctx.config, &args.query, &scope, top_k)?;

    if args.json {
        let resp = JsonResponse::ok()
            .with_query(&args.query, &scope, top_k, &ctx.config.scoring)
            .with_hits(&retrieval.hits)
            .with_stats(StatsOut {
                took_ms: started.elapsed().as_millis() as i64,
                total_hits: retrieval.hits.len() as i64,
                ..Default::default()
            })
            .with_warnings(degraded_warnings(&retrieval))
            .with_degraded(retrieval.degraded);
        print_json(&resp)?;
    } else {
        for hit in &retrieval.hits {
            println!("{:.4}  {}", hit.score, hit.citation());
            println!("    {}", hit.chunk.text.replace('\n', " "));
        }
        for warn in degraded_warnings(&retrieval) {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

fn cmd_ask(args: AskArgs) -> Result<()> {
    let (ctx, store) = open_store(StoreMode::ReadOnly)?;
    let scope = scope_of(&args.owner);
    let top_k = args.k.unwrap_or(ctx.config.top_k);
    let max_context = args.max_context.unwrap_or(ctx.config.max_context_length);
    let started = Instant::now();
    let retrieval = retrieve(&store, &ctx.config, &args.query, &scope, top_k)?;
    let reply = Reply::from_retrieval(&retrieval, max_context);

    if args.json {
        let resp = JsonResponse::ok()
            .with_query(&args.query, &scope, top_k, &ctx.config.scoring)
            .with_stats(StatsOut {
                took_ms: started.elapsed().as_millis() as i64,
                total_hits: retrieval.hits.len() as i64,
                ..Default::default()
            })
            .with_warnings(degraded_warnings(&retrieval))
            .with_degraded(retrieval.degraded)
            .with_reply(reply);
        print_json(&resp)?;
    } else {
        match &reply.message {
            Some(message) => println!("{message}"),
            None => {
                println!("{}", reply.context);
                println!();
                println!("Sources:");
                for citation in &reply.citations {
                    println!("- {citation}");
                }
            }
        }
        for warn in degraded_warnings(&retrieval) {
            eprintln!("warning: {warn}");
        }
    }
    Ok(())
}

fn cmd_stats(json: bool) -> Result<()> {
    let (ctx, store) = open_store(StoreMode::ReadOnly)?;
    let stats = store.stats()?;

    if json {
        let resp = JsonResponse::ok().with_stats(StatsOut {
            took_ms: 0,
            total_hits: 0,
            doc_count: Some(stats.doc_count),
            chunk_count: Some(stats.chunk_count),
            embedded_chunks: Some(stats.embedded_chunks),
            db_size_bytes: Some(stats.db_size_bytes),
        });
        print_json(&resp)?;
    } else {
        println!("Docs: {}", stats.doc_count);
        println!("Chunks: {}", stats.chunk_count);
        println!("Embedded chunks: {}", stats.embedded_chunks);
        println!("DB size: {} bytes", stats.db_size_bytes);
        println!("Scoring: {}", ctx.config.scoring);
    }
    Ok(())
}

fn cmd_export(args: ExportArgs) -> Result<()> {
    if args.json && args.out.is_none() {
        anyhow::bail!("--json requires --out for export");
    }
    let (_ctx, store) = open_store(StoreMode::ReadOnly)?;
    let user = args.user.as_deref();

    let stats = if let Some(path) = &args.out {
        let file =
            std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
        transfer::export_store(&store, user, file)?
    } else {
        let stdout = std::io::stdout();
        transfer::export_store(&store, user, stdout.lock())?
    };

    if args.json {
        let resp = JsonResponse::ok().with_stats(StatsOut {
            total_hits: (stats.docs + stats.chunks) as i64,
            doc_count: Some(stats.docs as i64),
            chunk_count: Some(stats.chunks as i64),
            ..Default::default()
        });
        print_json(&resp)?;
    }
    Ok(())
}

fn cmd_import(args: ImportArgs) -> Result<()> {
    let (_ctx, store) = open_store(StoreMode::ReadWrite)?;
    let file = std::fs::File::open(&args.path)
        .with_context(|| format!("open {}", args.path.display()))?;
    let stats = transfer::import_store(&store, file)?;

    if args.json {
        let resp = JsonResponse::ok().with_stats(StatsOut {
            total_hits: (stats.docs + stats.chunks) as i64,
            doc_count: Some(stats.docs as i64),
            chunk_count: Some(stats.chunks as i64),
            ..Default::default()
        });
        print_json(&resp)?;
    } else {
        println!("Imported {} docs ({} chunks)", stats.docs, stats.chunks);
    }
    Ok(())
}
