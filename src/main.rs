use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use bioindex::build::build_index;
use bioindex::catalog::{Catalog, IndexSpec};
use bioindex::config::Config;
use bioindex::genes::GffGeneResolver;
use bioindex::http::{self, App};
use bioindex::locus::GeneResolver;
use bioindex::query::{fetch_page, plan_all, plan_query, QueryCursor};
use bioindex::stats;
use bioindex::store::aws::AwsBlobClient;
use bioindex::store::{BlobClient, RecordStore};

#[derive(Parser)]
#[command(name = "bioindex", version, about = "Index and query sorted NDJSON shards in S3")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or replace an index declaration
    Create {
        /// Index name
        name: String,
        /// S3 key prefix ending in '/'
        prefix: String,
        /// Index schema, e.g. "phenotype,chromosome:position"
        schema: String,
    },

    /// List all indexes
    List,

    /// Build an index (or every index with '*')
    Index {
        /// Index name or '*'
        name: String,
        /// Objects indexed in parallel
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Stream matching records as NDJSON to stdout
    Query {
        /// Index name
        index: String,
        /// One value per key, plus an optional locus
        q: Vec<String>,
    },

    /// Estimate the number of matching records
    Count {
        /// Index name
        index: String,
        /// One value per key, plus an optional locus
        q: Vec<String>,
    },

    /// List distinct first-key values beginning with a prefix
    Match {
        /// Index name
        index: String,
        /// Key prefix
        prefix: String,
    },

    /// Stream every record under an index
    All {
        /// Index name
        index: String,
    },

    /// Emit a GraphQL SDL skeleton for the API collaborator
    BuildSchema {
        /// Write the schema to a file instead of stdout
        #[arg(short, long)]
        save: bool,
        /// Output path (defaults to the configured schema path)
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 5000)]
        port: u16,
    },

    /// Set the compressed flag on a catalog entry
    UpdateCompressedStatus {
        /// Index name
        index: String,
        /// S3 prefix, must match the catalog entry
        prefix: String,
        /// Mark the index as BGZF-compressed
        #[arg(short = 'c', long, overrides_with = "no_compress")]
        compress: bool,
        /// Mark the index as uncompressed
        #[arg(long, overrides_with = "compress")]
        no_compress: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    let catalog = Catalog::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let client: Arc<dyn BlobClient> = Arc::new(AwsBlobClient::new(&config.s3_bucket).await);

    match cli.command {
        Command::Create {
            name,
            prefix,
            schema,
        } => {
            let spec = IndexSpec::new(&name, &prefix, &schema)?;
            catalog.put(&spec).await?;
            eprintln!("created index '{}'; build with `bioindex index {}`", name, name);
        }

        Command::List => {
            for spec in catalog.list().await? {
                println!(
                    "{}\t{}\t{}\t{}{}",
                    if spec.built { "built" } else { "not built" },
                    spec.name,
                    spec.prefix,
                    spec.schema,
                    if spec.compressed { "\t[compressed]" } else { "" },
                );
            }
        }

        Command::Index { name, workers } => {
            let mut config = config;
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }

            let names: Vec<String> = if name == "*" {
                catalog.list().await?.iter().map(|s| s.name.clone()).collect()
            } else {
                vec![name]
            };

            for name in names {
                let summary = build_index(&catalog, client.clone(), &config, &name).await?;
                eprintln!(
                    "{}: {} rows from {} records across {} object(s) ({} skipped)",
                    name,
                    summary.rows,
                    summary.records,
                    summary.objects.len(),
                    summary.skipped,
                );
            }
        }

        Command::Query { index, q } => {
            let spec = catalog.get(&index).await?;
            let resolver = load_resolver(&config, &client).await;
            let plan = plan_query(
                catalog.pool(),
                &spec,
                &q,
                resolver.as_deref(),
                config.stitch_gap,
            )
            .await?;

            let store = RecordStore::new(client.clone(), spec.compressed);
            let mut cursor = Some(QueryCursor::new(&index, plan));
            while let Some(current) = cursor.take() {
                let page = fetch_page(&store, current, config.response_limit).await?;
                for record in &page.records {
                    println!("{}", serde_json::to_string(record)?);
                }
                cursor = page.cursor;
            }
        }

        Command::All { index } => {
            let spec = catalog.get(&index).await?;
            let plan = plan_all(catalog.pool(), &spec).await?;

            let store = RecordStore::new(client.clone(), spec.compressed);
            let mut cursor = Some(QueryCursor::new(&index, plan));
            while let Some(current) = cursor.take() {
                let page = fetch_page(&store, current, config.response_limit).await?;
                for record in &page.records {
                    println!("{}", serde_json::to_string(record)?);
                }
                cursor = page.cursor;
            }
        }

        Command::Count { index, q } => {
            let spec = catalog.get(&index).await?;
            let resolver = load_resolver(&config, &client).await;
            let plan = if q.is_empty() {
                plan_all(catalog.pool(), &spec).await?
            } else {
                plan_query(
                    catalog.pool(),
                    &spec,
                    &q,
                    resolver.as_deref(),
                    config.stitch_gap,
                )
                .await?
            };

            let store = RecordStore::new(client.clone(), spec.compressed);
            let count = stats::count(&store, &index, plan, config.sample_limit).await?;
            println!("{}", count);
        }

        Command::Match { index, prefix } => {
            let spec = catalog.get(&index).await?;
            let keys =
                stats::match_keys(catalog.pool(), &spec, &prefix, config.match_limit).await?;
            for key in keys {
                println!("{}", key);
            }
        }

        Command::BuildSchema { save, out } => {
            let sdl = build_graphql_sdl(&catalog).await?;
            let out_file = out.or_else(|| config.graphql_schema.clone());

            match out_file {
                Some(path) if save && path != "-" => {
                    std::fs::write(&path, sdl)
                        .with_context(|| format!("writing schema to {}", path))?;
                    eprintln!("wrote schema to {}", path);
                }
                _ => print!("{}", sdl),
            }
        }

        Command::Serve { port } => {
            let resolver = load_resolver(&config, &client).await;
            let app = Arc::new(App::new(config, catalog, client, resolver));
            http::serve(app, port).await?;
        }

        Command::UpdateCompressedStatus {
            index,
            prefix,
            compress,
            no_compress,
        } => {
            if !compress && !no_compress {
                bail!("specify either --compress or --no-compress");
            }
            let spec = catalog.get(&index).await?;
            if spec.prefix != prefix {
                bail!(
                    "index '{}' has prefix '{}', not '{}'",
                    index,
                    spec.prefix,
                    prefix
                );
            }
            catalog.set_compressed(&index, compress).await?;
            eprintln!("index '{}' compressed = {}", index, compress);
        }
    }

    Ok(())
}

/// Load the gene dictionary named by the configuration, if any.
///
/// The URI is tried as a local path first, then as an object key in the
/// configured bucket. Failures disable gene-name lookup but never fail
/// the command.
async fn load_resolver(
    config: &Config,
    client: &Arc<dyn BlobClient>,
) -> Option<Arc<dyn GeneResolver>> {
    let uri = config.genes_uri.clone()?;

    let loaded = if std::path::Path::new(&uri).exists() {
        GffGeneResolver::from_path(&uri)
    } else {
        match client.get_object(&uri).await {
            Ok(data) => GffGeneResolver::from_bytes(&data),
            Err(e) => Err(e),
        }
    };

    match loaded {
        Ok(resolver) => Some(Arc::new(resolver)),
        Err(e) => {
            warn!(uri, error = %e, "gene dictionary unavailable");
            None
        }
    }
}

/// Emit an SDL skeleton with one query field per built index.
///
/// Records are schemaless NDJSON, so result types are a `JSON` scalar the
/// GraphQL collaborator maps onto its own types.
async fn build_graphql_sdl(catalog: &Catalog) -> Result<String> {
    let mut sdl = String::from("scalar JSON\n\ntype Query {\n");

    for spec in catalog.list().await? {
        if !spec.built {
            continue;
        }

        let mut args: Vec<String> = spec
            .schema
            .key_parts()
            .iter()
            .map(|part| format!("{}: String!", part.column().replace('|', "_")))
            .collect();
        if spec.schema.has_locus() {
            args.push("locus: String".to_string());
        }

        let mut field = spec.schema_name.clone();
        if let Some(first) = field.get_mut(..1) {
            first.make_ascii_lowercase();
        }

        sdl.push_str(&format!("  {}({}): [JSON!]\n", field, args.join(", ")));
    }

    sdl.push_str("}\n");
    Ok(sdl)
}
