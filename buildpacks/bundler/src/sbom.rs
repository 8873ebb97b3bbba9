use commons::catalog::CatalogDependency;
use libcnb::data::sbom::SbomFormat;
use libcnb::sbom::Sbom;
use serde::Serialize;

const CYCLONEDX_SPEC_VERSION: &str = "1.4";

/// What was installed, recorded for the image's bill of materials
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BomEntry {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) sha256: String,
    pub(crate) uri: String,
    pub(crate) cpe: Option<String>,
    pub(crate) purl: Option<String>,
    pub(crate) licenses: Vec<String>,
}

impl From<&CatalogDependency> for BomEntry {
    fn from(dependency: &CatalogDependency) -> Self {
        Self {
            name: dependency.display_name().to_string(),
            version: dependency.version.to_string(),
            sha256: dependency.checksum().to_string(),
            uri: dependency.uri.clone(),
            cpe: dependency.cpe.clone(),
            purl: dependency.purl.clone(),
            licenses: dependency.licenses.clone(),
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CycloneDx<'a> {
    bom_format: &'static str,
    spec_version: &'static str,
    version: u32,
    components: Vec<Component<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Component<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    version: &'a str,
    hashes: Vec<Hash<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    licenses: Vec<LicenseChoice<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpe: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purl: Option<&'a str>,
    external_references: Vec<ExternalReference<'a>>,
}

#[derive(Serialize, Debug)]
struct Hash<'a> {
    alg: &'static str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct LicenseChoice<'a> {
    license: License<'a>,
}

#[derive(Serialize, Debug)]
struct License<'a> {
    id: &'a str,
}

#[derive(Serialize, Debug)]
struct ExternalReference<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    url: &'a str,
}

/// Renders entries as a CycloneDX JSON document
pub(crate) fn cyclonedx_json(entries: &[BomEntry]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(&CycloneDx {
        bom_format: "CycloneDX",
        spec_version: CYCLONEDX_SPEC_VERSION,
        version: 1,
        components: entries
            .iter()
            .map(|entry| Component {
                kind: "application",
                name: &entry.name,
                version: &entry.version,
                hashes: vec![Hash {
                    alg: "SHA-256",
                    content: &entry.sha256,
                }],
                licenses: entry
                    .licenses
                    .iter()
                    .map(|id| LicenseChoice {
                        license: License { id },
                    })
                    .collect(),
                cpe: entry.cpe.as_deref(),
                purl: entry.purl.as_deref(),
                external_references: vec![ExternalReference {
                    kind: "distribution",
                    url: &entry.uri,
                }],
            })
            .collect(),
    })
}

/// `None` when there is nothing to report
pub(crate) fn sbom(entries: &[BomEntry]) -> Result<Option<Sbom>, serde_json::Error> {
    if entries.is_empty() {
        return Ok(None);
    }
    cyclonedx_json(entries).map(|bytes| Some(Sbom::from_bytes(SbomFormat::CycloneDxJson, bytes)))
}
