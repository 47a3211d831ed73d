use ignore::{Walk, WalkBuilder};
use log::{debug, info};
use number_prefix::NumberPrefix;
use std::{
    fs::File,
    io::{self, Seek, SeekFrom},
    path::{Component, Path, PathBuf},
};
use tar::Builder as TarBuilder;

use crate::{errors::BuildError, hasher::DigestHasher};

/// The directory whose files COPY and EXTRACT may reference.
#[derive(Clone, Debug)]
pub struct BuildContext {
    root: PathBuf,
}

/// A tar stream ready to be extracted at `destination` inside a container.
pub struct ContextArchive {
    pub file: File,
    pub destination: String,
}

impl BuildContext {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<BuildContext, BuildError> {
        let root = root.as_ref();
        let metadata = root.metadata().map_err(|err| {
            BuildError::Context(format!("unable to access {}: {}", root.display(), err))
        })?;

        if !metadata.is_dir() {
            return Err(BuildError::Context(format!(
                "{} must be a directory",
                root.display()
            )));
        }

        let root = root.canonicalize().map_err(context_error)?;
        Ok(BuildContext { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a path relative to the context, refusing to leave it.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, BuildError> {
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|component| component == Component::ParentDir)
        {
            return Err(BuildError::Context(format!(
                "{} points outside of the build context",
                relative.display()
            )));
        }

        let path = self
            .root
            .join(relative.strip_prefix("/").unwrap_or(relative));
        if !path.exists() {
            return Err(BuildError::Context(format!(
                "{} does not exist in the build context",
                relative.display()
            )));
        }

        Ok(path)
    }

    /// Opens a tar archive from the context for EXTRACT.
    pub fn open_archive(&self, source: &str) -> Result<File, BuildError> {
        let path = self.resolve(source)?;
        File::open(&path).map_err(context_error)
    }

    /// Digest over the names and contents of `sources`, walked the same way
    /// `archive` walks them. Changes to any file that would be copied change
    /// the digest.
    pub fn digest(&self, sources: &[String]) -> Result<String, BuildError> {
        let mut hasher = blake3::Hasher::new();

        for source in sources {
            let path = self.resolve(source)?;
            hasher.input(source.as_str());

            if path.is_file() {
                hash_file(&mut hasher, &path)?;
                continue;
            }

            for result in walk(&path) {
                let entry = result.map_err(|err| BuildError::Context(err.to_string()))?;
                let name = entry
                    .path()
                    .strip_prefix(&path)
                    .map_err(|err| BuildError::Context(err.to_string()))?;
                hasher.input(name);

                if entry.file_type().map_or(false, |kind| kind.is_file()) {
                    hash_file(&mut hasher, entry.path())?;
                }
            }
        }

        let digest = hasher.finalize().to_hex().to_string();
        debug!("digest of {:?} is {}", sources, digest);
        Ok(digest)
    }

    /// Archives `sources` so that extracting the result at the returned
    /// destination reproduces COPY semantics: a single file copied to a path
    /// not ending in `/` is renamed, everything else lands inside
    /// `destination`. Directories are walked honoring `.dockerignore`.
    pub fn archive(&self, sources: &[String], destination: &str) -> Result<ContextArchive, BuildError> {
        let resolved = sources
            .iter()
            .map(|source| self.resolve(source))
            .collect::<Result<Vec<_>, _>>()?;

        let temp = tempfile::tempfile().map_err(context_error)?;
        let mut tar = TarBuilder::new(temp);
        let mut size = 0;

        let rename = resolved.len() == 1 && resolved[0].is_file() && !destination.ends_with('/');
        let extract_to = if rename {
            let (parent, name) = split_destination(destination);
            tar.append_path_with_name(&resolved[0], name)
                .map_err(context_error)?;
            size += resolved[0].metadata().map_err(context_error)?.len();
            parent
        } else {
            for source in resolved.iter() {
                if source.is_file() {
                    let name = source.file_name().ok_or_else(|| {
                        BuildError::Context(format!("{} has no file name", source.display()))
                    })?;
                    tar.append_path_with_name(source, name)
                        .map_err(context_error)?;
                    size += source.metadata().map_err(context_error)?.len();
                    continue;
                }

                for result in walk(source) {
                    let entry = result.map_err(|err| BuildError::Context(err.to_string()))?;
                    if entry.depth() == 0 {
                        continue;
                    }

                    let name = entry
                        .path()
                        .strip_prefix(source)
                        .map_err(|err| BuildError::Context(err.to_string()))?;
                    tar.append_path_with_name(entry.path(), name)
                        .map_err(context_error)?;
                    size += entry
                        .metadata()
                        .map_err(|err| BuildError::Context(err.to_string()))?
                        .len();
                }
            }

            match destination.trim_end_matches('/') {
                "" => "/".to_owned(),
                trimmed => trimmed.to_owned(),
            }
        };

        let mut file = tar.into_inner().map_err(context_error)?;
        file.seek(SeekFrom::Start(0)).map_err(context_error)?;

        match NumberPrefix::binary(size as f32) {
            NumberPrefix::Standalone(bytes) => info!("archived build context ({} bytes)", bytes),
            NumberPrefix::Prefixed(prefix, n) => {
                info!("archived build context ({:.1} {}B)", n, prefix)
            }
        };

        Ok(ContextArchive {
            file,
            destination: extract_to,
        })
    }
}

/// Directory walk honoring `.dockerignore`, in a stable order.
fn walk(source: &Path) -> Walk {
    WalkBuilder::new(source)
        .add_custom_ignore_filename(".dockerignore")
        .ignore(false)
        .git_global(false)
        .git_ignore(false)
        .git_exclude(false)
        .hidden(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build()
}

fn hash_file(hasher: &mut blake3::Hasher, path: &Path) -> Result<(), BuildError> {
    let mut file = File::open(path).map_err(context_error)?;
    io::copy(&mut file, hasher).map_err(context_error)?;
    Ok(())
}

fn split_destination(destination: &str) -> (String, String) {
    match destination.rfind('/') {
        Some(0) => ("/".to_owned(), destination[1..].to_owned()),
        Some(index) => (
            destination[..index].to_owned(),
            destination[index + 1..].to_owned(),
        ),
        None => (".".to_owned(), destination.to_owned()),
    }
}

fn context_error(err: std::io::Error) -> BuildError {
    BuildError::Context(err.to_string())
}
