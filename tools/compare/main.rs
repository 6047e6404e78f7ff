use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use vxsuppress::dsp::analysis::Metrics;
use vxsuppress::harness::{export_wav, process_buffer, read_wav, DiagnosticLog, ExportFormat};
use vxsuppress::{BackendChoice, BuiltinLoader, EffectSettings, PresetLibrary};

const USAGE: &str = "usage: denoise_compare <input.wav> [--preset NAME] [--presets FILE] \
[--backend NAME]... [--attenuation DB] [--strength S] [--vad] [--out DIR]";

struct Args {
    input: PathBuf,
    backends: Vec<BackendChoice>,
    base: EffectSettings,
    out_dir: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut input = None;
    let mut backends = Vec::new();
    let mut preset = None;
    let mut preset_file = None;
    let mut attenuation = None;
    let mut strength = None;
    let mut vad = false;
    let mut out_dir = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" => {
                let name = args.next().context("--backend needs a name")?;
                match BackendChoice::from_name(&name) {
                    Some(choice) => backends.push(choice),
                    None => bail!("unknown backend '{}'", name),
                }
            }
            "--preset" => preset = Some(args.next().context("--preset needs a name")?),
            "--presets" => {
                preset_file = Some(PathBuf::from(args.next().context("--presets needs a file")?))
            }
            "--attenuation" => {
                let v = args.next().context("--attenuation needs a value")?;
                attenuation = Some(v.parse().with_context(|| format!("bad attenuation '{}'", v))?);
            }
            "--strength" => {
                let v = args.next().context("--strength needs a value")?;
                strength = Some(v.parse().with_context(|| format!("bad strength '{}'", v))?);
            }
            "--vad" => vad = true,
            "--out" => out_dir = Some(PathBuf::from(args.next().context("--out needs a directory")?)),
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other if input.is_none() && !other.starts_with("--") => input = Some(PathBuf::from(other)),
            other => bail!("unexpected argument '{}'\n{}", other, USAGE),
        }
    }

    let library = match &preset_file {
        Some(path) => PresetLibrary::load(path)
            .with_context(|| format!("failed to read presets '{}'", path.display()))?,
        None => PresetLibrary::default(),
    };
    let mut base = match &preset {
        Some(name) => match library.get(name) {
            Some(settings) => *settings,
            None => bail!(
                "unknown preset '{}' (available: {})",
                name,
                library.names().join(", ")
            ),
        },
        None => EffectSettings::default(),
    };
    if let Some(v) = attenuation {
        base.attenuation_db = v;
    }
    if let Some(v) = strength {
        base.strength = v;
    }
    if vad {
        base.vad_enabled = true;
    }

    if backends.is_empty() && preset.is_some() {
        backends.push(base.backend);
    }
    if backends.is_empty() {
        backends = vec![
            BackendChoice::Spectral,
            BackendChoice::Rnnoise,
            BackendChoice::DeepFilter,
            BackendChoice::Dtln,
        ];
    }
    Ok(Args {
        input: input.context(USAGE)?,
        backends,
        base: base.sanitized(),
        out_dir,
    })
}

fn print_metrics(label: &str, m: &Metrics) {
    let lufs = m
        .loudness_lufs
        .map(|l| format!("{:7.1}", l))
        .unwrap_or_else(|| "    n/a".into());
    println!(
        "  {:<18} rms {:7.1} dB  peak {:6.3}  crest {:5.1} dB  snr {:5.1} dB  loudness {} LUFS",
        label, m.rms_db, m.peak, m.crest_db, m.snr_db, lufs
    );
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let raw = read_wav(&args.input)
        .with_context(|| format!("failed to read input WAV '{}'", args.input.display()))?;
    if let Some(dir) = &args.out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory '{}'", dir.display()))?;
    }

    println!(
        "Comparison for '{}' ({:.2}s, {} Hz, {} ch):",
        args.input.display(),
        raw.duration_secs(),
        raw.sample_rate(),
        raw.channel_count()
    );
    print_metrics("raw", &Metrics::compute(&raw));

    let loader = Arc::new(BuiltinLoader::new());
    let mut diagnostics = DiagnosticLog::new(32);
    for choice in &args.backends {
        let settings = args.base.with_backend(*choice);
        let take = process_buffer(&raw, &settings, loader.clone(), &mut diagnostics)
            .with_context(|| format!("backend '{}' failed", choice.name()))?;
        let label = if take.fell_back {
            format!("{} (fallback)", choice.name())
        } else {
            choice.name().to_string()
        };
        print_metrics(&label, &Metrics::compute(&take.buffer));

        if let Some(dir) = &args.out_dir {
            let path = dir.join(format!("{}.wav", choice.name()));
            export_wav(&path, &take.buffer, ExportFormat::Pcm16)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
        }
    }

    for entry in diagnostics.entries() {
        eprintln!("[{:?}] {}", entry.level, entry.message);
    }
    Ok(())
}
