use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "scenevoice", about = "Scene-by-scene voiceover generation")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate every scene of a project, combine and validate them
    Generate {
        /// Project definition (JSON)
        project: PathBuf,

        #[clap(flatten)]
        run: RunFlags,
    },

    /// Regenerate one scene of an already generated project
    Regenerate {
        project: PathBuf,

        scene_id: String,

        /// Replace the scene text for this run only
        #[clap(long)]
        text: Option<String>,

        #[clap(flatten)]
        run: RunFlags,
    },

    /// Check an existing audio file against its text
    Validate {
        audio: PathBuf,

        #[clap(long)]
        text: String,

        /// Expected duration in seconds
        #[clap(long)]
        expected: Option<f64>,
    },

    /// List the character presets
    Characters,

    /// Drop a dictionary name from the local cache
    ForgetDictionary { name: String },
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct RunFlags {
    /// Character for every scene that does not name its own
    #[clap(long)]
    pub character: Option<String>,

    #[clap(long)]
    pub voice: Option<String>,

    #[clap(long)]
    pub model: Option<String>,

    #[clap(long)]
    pub skip_validation: bool,

    #[clap(long)]
    pub no_combine: bool,

    #[clap(long)]
    pub output_dir: Option<PathBuf>,
}
