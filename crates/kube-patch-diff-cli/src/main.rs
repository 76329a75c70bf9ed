use std::path::{Path, PathBuf};

use clap::Parser;
use kube_patch_diff::{
    DetailedDiff, ForceNewDatabase, ForceNewPattern, compute_diff,
    force_new::{ForceNewDatabaseError, SchemaQueryError},
    kube::core::DynamicObject,
    last_applied, logging,
    merge_patch::create_object_merge_patch,
};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "kube-patch-diff";
const LOG_ENV: &str = "KUBE_PATCH_DIFF_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to read {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse {path:?} as YAML or JSON"))]
    ParseFile {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("expected {path:?} to contain an object"))]
    NotAnObject { path: PathBuf },

    #[snafu(display("failed to interpret the old live state as Kubernetes object"))]
    ParseLiveObject { source: serde_json::Error },

    #[snafu(display("failed to load the force-new configuration"))]
    LoadForceNewConfig { source: ForceNewDatabaseError },

    #[snafu(display("failed to determine the kind of the new inputs"))]
    DetermineKind { source: ForceNewDatabaseError },

    #[snafu(display("failed to compute the detailed diff"))]
    ComputeDiff { source: SchemaQueryError },

    #[snafu(display("failed to serialize the detailed diff as JSON"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("failed to serialize the detailed diff as YAML"))]
    SerializeYaml { source: serde_yaml::Error },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// Prints which properties of a Kubernetes object change, and whether the object has to be
/// replaced to apply the change.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Opts {
    /// The object as it currently exists in the cluster
    #[arg(long, value_name = "FILE", env = "KUBE_PATCH_DIFF_OLD_LIVE")]
    old_live: PathBuf,

    /// The desired object
    #[arg(long, value_name = "FILE", env = "KUBE_PATCH_DIFF_NEW_INPUTS")]
    new_inputs: PathBuf,

    /// The previously desired object. Defaults to the last applied configuration of the live
    /// object.
    #[arg(long, value_name = "FILE", env = "KUBE_PATCH_DIFF_OLD_INPUTS")]
    old_inputs: Option<PathBuf>,

    /// A precomputed merge patch. Defaults to the merge patch from the old to the new inputs.
    #[arg(long, value_name = "FILE")]
    patch: Option<PathBuf>,

    /// Additional force-new patterns per group, version and kind
    #[arg(long, value_name = "FILE", env = "KUBE_PATCH_DIFF_FORCE_NEW_CONFIG")]
    force_new_config: Option<PathBuf>,

    /// An additional property pattern whose change requires replacement, e.g. `.spec.selector`
    #[arg(long = "force-new", value_name = "PATTERN")]
    force_new: Vec<ForceNewPattern>,

    #[arg(long, short, value_enum, default_value_t)]
    output: OutputFormat,
}

#[snafu::report]
fn main() -> Result<(), Error> {
    logging::initialize_logging(LOG_ENV, APP_NAME);

    let opts = Opts::parse();
    let output = opts.output;
    let diff = run(opts)?;

    println!("{}", render(&diff, output)?);
    Ok(())
}

fn run(opts: Opts) -> Result<DetailedDiff, Error> {
    let old_live = read_object(&opts.old_live)?;
    let new_inputs = read_object(&opts.new_inputs)?;

    let live: DynamicObject =
        serde_json::from_value(Value::Object(old_live.clone())).context(ParseLiveObjectSnafu)?;

    // The inputs the live object was created from, if they are known
    let recorded_inputs = match &opts.old_inputs {
        Some(path) => Some(read_object(path)?),
        None => last_applied::parse_last_applied_config(&live).and_then(into_object),
    };
    let old_inputs = recorded_inputs
        .clone()
        .or_else(|| into_object(last_applied::parse_live_inputs(&live, None)))
        .unwrap_or_default();

    let patch = match &opts.patch {
        Some(path) => read_object(path)?,
        None => {
            create_object_merge_patch(recorded_inputs.as_ref().unwrap_or(&old_live), &new_inputs)
        }
    };
    if patch.is_empty() {
        tracing::info!("inputs are unchanged, nothing to diff");
        return Ok(DetailedDiff::new());
    }

    let database = match &opts.force_new_config {
        Some(path) => ForceNewDatabase::from_file(path).context(LoadForceNewConfigSnafu)?,
        None => ForceNewDatabase::builtin(),
    };
    let gvk = ForceNewDatabase::gvk_of(&Value::Object(new_inputs.clone()))
        .context(DetermineKindSnafu)?;

    let mut force_new = database.patterns_for(&gvk);
    force_new.extend(opts.force_new);
    tracing::debug!(
        group = %gvk.group,
        version = %gvk.version,
        kind = %gvk.kind,
        patterns = force_new.len(),
        "resolved force-new patterns"
    );

    compute_diff(
        &patch,
        &old_live,
        Some(&new_inputs),
        Some(&old_inputs),
        &force_new,
    )
    .context(ComputeDiffSnafu)
}

fn render(diff: &DetailedDiff, output: OutputFormat) -> Result<String, Error> {
    match output {
        OutputFormat::Json => serde_json::to_string_pretty(diff).context(SerializeJsonSnafu),
        OutputFormat::Yaml => serde_yaml::to_string(diff).context(SerializeYamlSnafu),
    }
}

fn into_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

/// Reads a YAML or JSON file containing a single object.
fn read_object(path: &Path) -> Result<Map<String, Value>, Error> {
    let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    let value: Value = serde_yaml::from_str(&content).context(ParseFileSnafu { path })?;

    match value {
        Value::Object(object) => Ok(object),
        _ => NotAnObjectSnafu { path }.fail(),
    }
}
