use crate::metadata::ProjectMetadata;
use crate::project::Scene;

/// Most prior request ids the backend accepts for continuity.
pub const WINDOW_SIZE: usize = 3;

/// Request ids of the scenes right before the one being synthesized,
/// oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StitchingWindow(Vec<String>);

impl StitchingWindow {
    /// Keep the last [`WINDOW_SIZE`] ids of `ids`.
    pub fn from_recent<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut ids: Vec<String> = ids.into_iter().collect();
        if ids.len() > WINDOW_SIZE {
            let stale = ids.len() - WINDOW_SIZE;
            ids.drain(..stale);
        }
        StitchingWindow(ids)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where prior request ids come from.
pub enum WindowSource<'a> {
    /// Ids produced so far in this batch run, oldest first. Scenes whose
    /// synthesis returned no id are already absent.
    Run(&'a [String]),
    /// A previous run's metadata, looked up by the scene order of the
    /// project definition.
    Persisted {
        scenes: &'a [Scene],
        metadata: &'a ProjectMetadata,
    },
}

impl WindowSource<'_> {
    /// Window for the scene at `index` in the project definition.
    pub fn window_for(&self, index: usize) -> StitchingWindow {
        match self {
            WindowSource::Run(history) => StitchingWindow::from_recent(history.iter().cloned()),
            WindowSource::Persisted { scenes, metadata } => {
                let end = index.min(scenes.len());
                let start = end.saturating_sub(WINDOW_SIZE);
                StitchingWindow::from_recent(scenes[start..end].iter().filter_map(|scene| {
                    metadata
                        .scene(&scene.id)
                        .and_then(|stored| stored.request_id.clone())
                }))
            }
        }
    }
}
