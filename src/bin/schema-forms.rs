//! Schema Forms CLI
//!
//! Command-line interface for compiling schemas into forms, assembling
//! request payloads from form state, and importing payloads back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use schema_forms::{
    compile, load_document, load_document_auto, load_text, project, resolve_active, CompileError,
    CompileOptions, CompiledForm, FormSession, FormState, ProjectionContext, RuleSet,
    SchemaSources, ValidateError, WrapperRules,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-forms")]
#[command(about = "Compile schemas into forms and assemble request payloads")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a schema into sections of canonical fields
    Compile {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        #[command(flatten)]
        form: FormArgs,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Project a schema into builder fields, optionally against form state
    Fields {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        #[command(flatten)]
        form: FormArgs,

        /// Form state file used for visibility and enum resolution
        #[arg(long)]
        state: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Assemble a request payload from form state
    Assemble {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        #[command(flatten)]
        form: FormArgs,

        /// Form state file (flat dot-path JSON object)
        #[arg(long)]
        state: PathBuf,

        /// Endpoint path used to select a wrapper rule
        #[arg(long)]
        endpoint: Option<String>,

        /// State file holds instances keyed "1", "2", ...
        #[arg(long)]
        instances: bool,

        /// Check visible fields before assembling; fail on any error
        #[arg(long)]
        check: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Rebuild form state from a request payload
    Import {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        #[command(flatten)]
        form: FormArgs,

        /// Payload file to import
        #[arg(long)]
        payload: PathBuf,

        /// Payload holds instances keyed "1", "2", ...
        #[arg(long)]
        instances: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Report which schema source drives the form
    Resolve {
        /// Saved schema file
        #[arg(long)]
        saved: Option<PathBuf>,

        /// Enhanced schema file
        #[arg(long)]
        enhanced: Option<PathBuf>,

        /// Original schema file
        #[arg(long)]
        original: Option<PathBuf>,

        /// Rule-set file supplying enhanced-dialect markers
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Include the active schema document in the output
        #[arg(long)]
        show_schema: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
}

/// Options shared by every command that compiles a schema.
#[derive(clap::Args)]
struct FormArgs {
    /// Operating mode (discriminant value, e.g. STATIC)
    #[arg(long, short, default_value = "")]
    mode: String,

    /// Rule-set file (JSON, or YAML with the `yaml` feature)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Discriminant field name (overridden by the rule set)
    #[arg(long)]
    discriminant: Option<String>,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            schema,
            form,
            pretty,
        } => run_compile(&schema, &form, pretty),

        Commands::Fields {
            schema,
            form,
            state,
            pretty,
        } => run_fields(&schema, &form, state.as_deref(), pretty),

        Commands::Assemble {
            schema,
            form,
            state,
            endpoint,
            instances,
            check,
            output,
            pretty,
        } => run_assemble(AssembleArgs {
            schema,
            form,
            state,
            endpoint,
            instances,
            check,
            output,
            pretty,
        }),

        Commands::Import {
            schema,
            form,
            payload,
            instances,
            output,
            pretty,
        } => run_import(&schema, &form, &payload, instances, output, pretty),

        Commands::Resolve {
            saved,
            enhanced,
            original,
            rules,
            show_schema,
            pretty,
        } => run_resolve(
            [saved, enhanced, original],
            rules.as_deref(),
            show_schema,
            pretty,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Logs go to stderr so stdout stays pure JSON.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn load_rules(path: Option<&Path>) -> Result<RuleSet, u8> {
    match path {
        Some(path) => RuleSet::load(path).map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        }),
        None => Ok(RuleSet::default()),
    }
}

fn compile_form(schema_source: &str, args: &FormArgs) -> Result<(CompiledForm, WrapperRules), u8> {
    let schema = load_document_auto(schema_source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let rules = load_rules(args.rules.as_deref())?;
    let wrappers = rules.with_schema_overrides(&schema).wrappers().map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut options = CompileOptions::new(args.mode.as_str());
    if let Some(discriminant) = &args.discriminant {
        options = options.discriminant(discriminant.as_str());
    }
    let form = compile(&schema, &options, &rules).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    Ok((form, wrappers))
}

fn load_state_file(path: &Path) -> Result<Value, u8> {
    load_document(path).map_err(|e| {
        eprintln!("Error loading state: {}", e);
        e.exit_code() as u8
    })
}

fn parse_state(value: Value) -> Result<FormState, u8> {
    serde_json::from_value(value).map_err(|e| {
        eprintln!("Error: invalid form state: {}", e);
        1u8
    })
}

fn run_compile(schema_source: &str, args: &FormArgs, pretty: bool) -> Result<(), u8> {
    let (form, _) = compile_form(schema_source, args)?;
    emit(&form, None, pretty)
}

fn run_fields(
    schema_source: &str,
    args: &FormArgs,
    state: Option<&Path>,
    pretty: bool,
) -> Result<(), u8> {
    let (form, _) = compile_form(schema_source, args)?;
    let state = state
        .map(|path| load_state_file(path).and_then(parse_state))
        .transpose()?;

    let mut ctx = ProjectionContext::new(&form.mode);
    if let Some(state) = &state {
        ctx = ctx.with_state(state);
    }
    emit(&project(&form, &ctx), None, pretty)
}

struct AssembleArgs {
    schema: String,
    form: FormArgs,
    state: PathBuf,
    endpoint: Option<String>,
    instances: bool,
    check: bool,
    output: Option<PathBuf>,
    pretty: bool,
}

fn run_assemble(args: AssembleArgs) -> Result<(), u8> {
    let (form, wrappers) = compile_form(&args.schema, &args.form)?;
    let mut session = FormSession::new(form, wrappers);
    let state = load_state_file(&args.state)?;

    if args.instances {
        let instances: BTreeMap<u32, FormState> = serde_json::from_value(state).map_err(|e| {
            eprintln!("Error: invalid instance state: {}", e);
            1u8
        })?;
        if !session.load_instances(instances) {
            eprintln!("Error: state contains no instances");
            return Err(1);
        }
    } else {
        session.load_state(parse_state(state)?).map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;
    }

    if args.check {
        if let Err(ValidateError::Invalid { errors }) = session.validate() {
            eprintln!("Validation failed:");
            for error in errors {
                eprintln!("  {}", error);
            }
            return Err(1);
        }
    }

    let payload = session.assemble(args.endpoint.as_deref());
    emit(&payload, args.output.as_deref(), args.pretty)
}

fn run_import(
    schema_source: &str,
    args: &FormArgs,
    payload: &Path,
    instances: bool,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let (form, wrappers) = compile_form(schema_source, args)?;
    let mut session = FormSession::new(form, wrappers);
    if instances {
        session.enable_instances();
    }

    let text = load_text(payload).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    session.import_json(&text).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    match session.instances() {
        Some(set) => {
            let states: BTreeMap<u32, &FormState> = set.iter().collect();
            emit(&states, output.as_deref(), pretty)
        }
        None => emit(session.state(), output.as_deref(), pretty),
    }
}

fn run_resolve(
    paths: [Option<PathBuf>; 3],
    rules: Option<&Path>,
    show_schema: bool,
    pretty: bool,
) -> Result<(), u8> {
    let mut texts = Vec::with_capacity(3);
    for path in &paths {
        let text = path
            .as_deref()
            .map(|p| {
                load_text(p).map_err(|e| {
                    eprintln!("Error: {}", e);
                    e.exit_code() as u8
                })
            })
            .transpose()?;
        texts.push(text);
    }
    let [saved, enhanced, original] = [&texts[0], &texts[1], &texts[2]];
    let sources = SchemaSources::from_strings(saved.as_deref(), enhanced.as_deref(), original.as_deref())
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;

    let markers = load_rules(rules)?.marker_set();
    let Some(active) = resolve_active(&sources, &markers) else {
        let e = CompileError::NoSchema;
        eprintln!("Error: {}", e);
        return Err(e.exit_code() as u8);
    };

    let mut report = json!({
        "source": active.source,
        "isEnhanced": active.is_enhanced,
    });
    if show_schema {
        report["schema"] = active.document;
    }
    emit(&report, None, pretty)
}

fn emit<T: Serialize + ?Sized>(value: &T, output: Option<&Path>, pretty: bool) -> Result<(), u8> {
    let json_output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}
