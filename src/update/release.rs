use crate::error::{Result, UpdateError};

/// A published release, as listed by the release source.
#[derive(Debug, Clone)]
pub struct Release {
    pub tag: String,
    pub prerelease: bool,
    pub assets: Vec<Asset>,
    pub archive_url: String,
}

#[derive(Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub download_url: String,
}

/// Pick the release to install from a newest-first list.
pub fn resolve_release<'a>(
    releases: &'a [Release],
    accept_pre_releases: bool,
    repo: &str,
) -> Result<&'a Release> {
    let found = if accept_pre_releases {
        releases.first()
    } else {
        releases.iter().find(|r| !r.prerelease)
    };

    found.ok_or_else(|| UpdateError::ReleaseNotFound {
        repo: repo.to_string(),
    })
}

/// Pick the asset to download: the named one, or the first when no name is given.
pub fn resolve_asset<'a>(release: &'a Release, name: Option<&str>) -> Result<&'a Asset> {
    let first = release.assets.first().ok_or_else(|| UpdateError::NoAssetsFound {
        release: release.tag.clone(),
    })?;

    let Some(name) = name else {
        return Ok(first);
    };

    release
        .assets
        .iter()
        .find(|a| a.name == name)
        .ok_or_else(|| UpdateError::AssetNotFound {
            release: release.tag.clone(),
            asset: name.to_string(),
        })
}
