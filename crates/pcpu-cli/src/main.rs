use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use pcpu::driver::{PiosLinkOptions, PiosToolchain};
use pcpu::link::InputObject;
use pcpu::reloc::RelocType;
use pcpu::{LinkOptions, Linker, TargetConfig};

#[derive(Parser)]
#[command(name = "pcpu")]
#[command(about = "PCPU assembler and linker for the PiOS ABI")]
struct Cli {
    #[arg(long, global = true, help = "Target the big-endian 32-bit variant instead of PiOS")]
    wide: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a source file into an ELF relocatable object.
    #[command(name = "as")]
    Assemble {
        #[arg(help = "Input assembly file")]
        input: PathBuf,

        #[arg(short, long, help = "Output object file")]
        output: PathBuf,
    },
    /// Link objects into a flat image.
    #[command(name = "ld")]
    Link {
        #[arg(required = true, help = "Input object files")]
        inputs: Vec<PathBuf>,

        #[arg(short, long, help = "Output image file")]
        output: PathBuf,

        #[arg(short, long, help = "Entry symbol", default_value = pcpu::link::DEFAULT_ENTRY)]
        entry: String,

        #[arg(long, help = "Do not require an entry symbol")]
        nostdlib: bool,

        #[arg(long, help = "Load address of the image", default_value_t = 0, value_parser = parse_address)]
        base: u64,

        #[arg(long, help = "Print the resolved symbol table")]
        print_symbols: bool,
    },
    /// Dump the relocations of an object as JSON.
    Relocs {
        #[arg(help = "Input object file")]
        input: PathBuf,
    },
    /// Print the PiOS linker command line for a link job.
    PiosLink {
        #[arg(long, help = "PiOS sysroot")]
        sysroot: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short = 'L', help = "Library search path")]
        search_paths: Vec<PathBuf>,

        #[arg(long)]
        nostdlib: bool,

        #[arg(long)]
        shared: bool,

        #[arg(long)]
        pthread: bool,

        #[arg(long, help = "Link profiling libraries")]
        pg: bool,

        #[arg(long, help = "Link as C++")]
        cxx: bool,

        #[arg(help = "Objects and libraries in link order")]
        inputs: Vec<String>,
    },
}

fn parse_address(text: &str) -> std::result::Result<u64, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid address {text}: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = if cli.wide {
        TargetConfig::wide()
    } else {
        TargetConfig::pios()
    };
    tracing::debug!(triple = %config.triple, "selected target");

    match cli.command {
        Commands::Assemble { input, output } => {
            tracing::debug!(input = %input.display(), output = %output.display(), "assembling");
            let source = fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let object = match pcpu::assemble(&source, &config) {
                Ok(object) => object,
                Err(pcpu::Error::Assembly(diagnostics)) => {
                    for diag in &diagnostics {
                        eprintln!("{}:{diag}", input.display());
                    }
                    bail!("{} error(s) assembling {}", diagnostics.len(), input.display());
                }
                Err(e) => return Err(e).context("Assembly failed"),
            };
            let elf = object.to_elf().context("Failed to write object")?;
            fs::write(&output, &elf)
                .with_context(|| format!("Failed to write output to {}", output.display()))?;
            println!(
                "Assembled {} -> {} ({} bytes)",
                input.display(),
                output.display(),
                elf.len()
            );
        }
        Commands::Link {
            inputs,
            output,
            entry,
            nostdlib,
            base,
            print_symbols,
        } => {
            let options = LinkOptions {
                entry: (!nostdlib).then_some(entry),
                base_address: base,
            };
            tracing::debug!(objects = inputs.len(), base, "linking");
            let mut linker = Linker::new(&config, options);
            for path in &inputs {
                let bytes = read_object(path)?;
                linker
                    .add_object(&path.display().to_string(), &bytes)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
            }
            let image = linker.link().context("Link failed")?;
            fs::write(&output, &image.image)
                .with_context(|| format!("Failed to write output to {}", output.display()))?;
            if print_symbols {
                for (name, address) in &image.symbols {
                    println!("{address:08x} {name}");
                }
            }
            println!(
                "Linked {} object(s) -> {} ({} bytes)",
                inputs.len(),
                output.display(),
                image.image.len()
            );
        }
        Commands::Relocs { input } => {
            let bytes = read_object(&input)?;
            let object = InputObject::parse(&input.display().to_string(), &bytes, &config)
                .with_context(|| format!("Failed to parse {}", input.display()))?;
            tracing::debug!(sections = object.sections.len(), "parsed object");
            let dump = relocations_json(&object);
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        Commands::PiosLink {
            sysroot,
            output,
            search_paths,
            nostdlib,
            shared,
            pthread,
            pg,
            cxx,
            inputs,
        } => {
            let toolchain = PiosToolchain::new(sysroot);
            let options = PiosLinkOptions {
                output,
                inputs,
                search_paths,
                nostdlib,
                shared,
                pthread,
                profile: pg,
                cxx,
                link_cxx_stdlib: cxx,
                ..PiosLinkOptions::default()
            };
            println!("{}", toolchain.linker_args(&options).join(" "));
        }
    }

    Ok(())
}

fn read_object(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn relocations_json(object: &InputObject) -> serde_json::Value {
    let sections: Vec<_> = object
        .sections
        .iter()
        .filter(|section| !section.relocations.is_empty())
        .map(|section| {
            let relocations: Vec<_> = section
                .relocations
                .iter()
                .map(|reloc| {
                    let kind = RelocType::from_code(reloc.r_type)
                        .map_or_else(|| format!("unknown({})", reloc.r_type), |r| r.name().to_string());
                    serde_json::json!({
                        "offset": reloc.offset,
                        "type": kind,
                        "symbol": object.symbols[reloc.symbol].name,
                        "addend": reloc.addend,
                    })
                })
                .collect();
            serde_json::json!({
                "section": section.name,
                "relocations": relocations,
            })
        })
        .collect();
    serde_json::json!({
        "object": object.name,
        "sections": sections,
    })
}
