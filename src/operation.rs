//! Single SLIPO Toolkit component executions.
//!
//! Every operation runs server-side as a one-step process, so its progress is
//! observed through the process status endpoint.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::process::{ExecutionFile, ExecutionFileType, ProcessRef, Status};

/// Data formats understood by the Toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataFormat {
    Csv,
    Gpx,
    Geojson,
    Json,
    OsmPbf,
    OsmXml,
    Shapefile,
    RdfXml,
    RdfXmlAbbrev,
    Turtle,
    Xml,
    NTriples,
    N3,
}

impl DataFormat {
    pub const ALL: [DataFormat; 13] = [
        DataFormat::Csv,
        DataFormat::Gpx,
        DataFormat::Geojson,
        DataFormat::Json,
        DataFormat::OsmPbf,
        DataFormat::OsmXml,
        DataFormat::Shapefile,
        DataFormat::RdfXml,
        DataFormat::RdfXmlAbbrev,
        DataFormat::Turtle,
        DataFormat::Xml,
        DataFormat::NTriples,
        DataFormat::N3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataFormat::Csv => "CSV",
            DataFormat::Gpx => "GPX",
            DataFormat::Geojson => "GEOJSON",
            DataFormat::Json => "JSON",
            DataFormat::OsmPbf => "OSM_PBF",
            DataFormat::OsmXml => "OSM_XML",
            DataFormat::Shapefile => "SHAPEFILE",
            DataFormat::RdfXml => "RDF_XML",
            DataFormat::RdfXmlAbbrev => "RDF_XML_ABBREV",
            DataFormat::Turtle => "TURTLE",
            DataFormat::Xml => "XML",
            DataFormat::NTriples => "N_TRIPLES",
            DataFormat::N3 => "N3",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = Error;

    /// Case-insensitive; `-` is accepted in place of `_`.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        DataFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| Error::config(format!("unsupported data format `{}`", s)))
    }
}

/// Toolkit component executed by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Transform,
    Interlink,
    Fuse,
    Enrich,
}

impl OperationKind {
    fn endpoint(self) -> &'static str {
        match self {
            OperationKind::Transform => "toolkit/transform",
            OperationKind::Interlink => "toolkit/interlink",
            OperationKind::Fuse => "toolkit/fuse",
            OperationKind::Enrich => "toolkit/enrich",
        }
    }

    /// Key of the profile list returned by [`Operations::profiles`].
    fn profile_key(self) -> &'static str {
        match self {
            OperationKind::Transform => "transform",
            OperationKind::Interlink => "interlink",
            OperationKind::Fuse => "fuse",
            OperationKind::Enrich => "enrich",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Transform => "TRANSFORM",
            OperationKind::Interlink => "INTERLINK",
            OperationKind::Fuse => "FUSE",
            OperationKind::Enrich => "ENRICH",
        })
    }
}

/// An RDF dataset consumed by an operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type")]
pub enum DataSource {
    /// Relative path on the user's remote file system.
    #[serde(rename = "FILESYSTEM")]
    FileSystem { path: String },
    /// A catalog resource revision.
    #[serde(rename = "CATALOG")]
    Catalog { id: i64, version: i64 },
    /// An output file of a workflow or operation execution.
    #[serde(rename = "PROCESS")]
    ProcessOutput {
        id: i64,
        version: i64,
        #[serde(rename = "fileId")]
        file_id: i64,
    },
}

impl DataSource {
    pub fn file(path: impl Into<String>) -> Self {
        DataSource::FileSystem { path: path.into() }
    }

    pub fn catalog(id: i64, version: i64) -> Self {
        DataSource::Catalog { id, version }
    }

    pub fn process_output(process: ProcessRef, file_id: i64) -> Self {
        DataSource::ProcessOutput {
            id: process.id,
            version: process.version,
            file_id,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            DataSource::FileSystem { path } if path.trim().trim_matches('/').is_empty() => {
                Err(Error::validation("input path must not be empty"))
            }
            DataSource::Catalog { id, version } if *id <= 0 || *version <= 0 => Err(
                Error::validation(format!("invalid catalog resource {}/{}", id, version)),
            ),
            DataSource::ProcessOutput {
                id,
                version,
                file_id,
            } if *id <= 0 || *version <= 0 || *file_id <= 0 => Err(Error::validation(format!(
                "invalid process output {}/{}/{}",
                id, version, file_id
            ))),
            _ => Ok(()),
        }
    }
}

impl From<&str> for DataSource {
    fn from(path: &str) -> Self {
        DataSource::file(path)
    }
}

impl From<(i64, i64)> for DataSource {
    fn from((id, version): (i64, i64)) -> Self {
        DataSource::catalog(id, version)
    }
}

impl From<(i64, i64, i64)> for DataSource {
    fn from((id, version, file_id): (i64, i64, i64)) -> Self {
        DataSource::ProcessOutput {
            id,
            version,
            file_id,
        }
    }
}

/// Options of a transform (TripleGeo) run.
///
/// Keys follow the server's spelling; unknown keys are rejected when built
/// with [`TransformConfiguration::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformConfiguration {
    /// Name of a transform profile, see [`Operations::profiles`].
    #[serde(default)]
    pub profile: Option<String>,
    /// Remote path of a YML mapping to a custom ontology. Required without a profile.
    #[serde(default)]
    pub mapping_spec: Option<String>,
    /// Remote path of a YML/CSV classification scheme.
    #[serde(default)]
    pub classification_spec: Option<String>,
    #[serde(default)]
    pub input_format: Option<DataFormat>,
    #[serde(default)]
    pub feature_source: Option<String>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub attr_key: Option<String>,
    #[serde(default)]
    pub attr_name: Option<String>,
    #[serde(default)]
    pub attr_category: Option<String>,
    #[serde(default)]
    pub attr_geometry: Option<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
    /// X coordinate column, CSV input only.
    #[serde(default, rename = "attrX")]
    pub attr_x: Option<String>,
    /// Y coordinate column, CSV input only.
    #[serde(default, rename = "attrY")]
    pub attr_y: Option<String>,
    #[serde(default = "default_crs", rename = "sourceCRS")]
    pub source_crs: String,
    #[serde(default = "default_crs", rename = "targetCRS")]
    pub target_crs: String,
    #[serde(default = "default_lang")]
    pub default_lang: String,
}

fn default_encoding() -> String {
    "UTF-8".to_string()
}

fn default_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_lang() -> String {
    "en".to_string()
}

impl Default for TransformConfiguration {
    fn default() -> Self {
        Self {
            profile: None,
            mapping_spec: None,
            classification_spec: None,
            input_format: None,
            feature_source: None,
            encoding: default_encoding(),
            attr_key: None,
            attr_name: None,
            attr_category: None,
            attr_geometry: None,
            delimiter: None,
            quote: None,
            attr_x: None,
            attr_y: None,
            source_crs: default_crs(),
            target_crs: default_crs(),
            default_lang: default_lang(),
        }
    }
}

impl TransformConfiguration {
    pub fn from_json(options: &Value) -> Result<Self> {
        serde_json::from_value(options.clone())
            .map_err(|e| Error::config(format!("invalid transform options: {}", e)))
    }
}

/// Converts a CSV, SHAPEFILE or other supported file into RDF.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TransformParameters {
    /// Relative path of the input file on the remote file system.
    pub path: String,
    pub configuration: TransformConfiguration,
}

impl TransformParameters {
    pub fn new(path: impl Into<String>, format: DataFormat, profile: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            configuration: TransformConfiguration {
                profile: Some(profile.into()),
                input_format: Some(format),
                ..TransformConfiguration::default()
            },
        }
    }

    pub fn csv(path: impl Into<String>, profile: impl Into<String>) -> Self {
        Self::new(path, DataFormat::Csv, profile)
    }

    pub fn shapefile(path: impl Into<String>, profile: impl Into<String>) -> Self {
        Self::new(path, DataFormat::Shapefile, profile)
    }

    fn validate(&self) -> Result<()> {
        let c = &self.configuration;
        if self.path.trim().trim_matches('/').is_empty() {
            return Err(Error::validation("transform input path must not be empty"));
        }
        if non_empty(&c.profile).is_none() && non_empty(&c.mapping_spec).is_none() {
            return Err(Error::validation(
                "transform requires either a profile or a mappingSpec",
            ));
        }
        let Some(format) = c.input_format else {
            return Err(Error::validation("transform requires an inputFormat"));
        };
        if format != DataFormat::Csv && (c.attr_x.is_some() || c.attr_y.is_some()) {
            return Err(Error::validation(format!(
                "attrX/attrY only apply to CSV input, not {}",
                format
            )));
        }
        for (name, value) in [("delimiter", &c.delimiter), ("quote", &c.quote)] {
            if let Some(v) = value {
                if v.chars().count() != 1 {
                    return Err(Error::validation(format!(
                        "{} must be a single character, got `{}`",
                        name, v
                    )));
                }
            }
        }
        for (name, value) in [("sourceCRS", &c.source_crs), ("targetCRS", &c.target_crs)] {
            if !is_epsg(value) {
                return Err(Error::validation(format!(
                    "{} must look like EPSG:<code>, got `{}`",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn is_epsg(v: &str) -> bool {
    match v.split_once(':') {
        Some((prefix, code)) => {
            prefix.eq_ignore_ascii_case("EPSG")
                && !code.is_empty()
                && code.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Generates links between two RDF datasets.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InterlinkParameters {
    pub profile: String,
    pub left: DataSource,
    pub right: DataSource,
}

/// Fuses two RDF datasets using their links into a new dataset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FuseParameters {
    pub profile: String,
    pub left: DataSource,
    pub right: DataSource,
    pub links: DataSource,
}

/// Enriches an RDF dataset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EnrichParameters {
    pub profile: String,
    #[serde(rename = "input")]
    pub source: DataSource,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum OperationParameters {
    Transform(TransformParameters),
    Interlink(InterlinkParameters),
    Fuse(FuseParameters),
    Enrich(EnrichParameters),
}

impl OperationParameters {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationParameters::Transform(_) => OperationKind::Transform,
            OperationParameters::Interlink(_) => OperationKind::Interlink,
            OperationParameters::Fuse(_) => OperationKind::Fuse,
            OperationParameters::Enrich(_) => OperationKind::Enrich,
        }
    }

    /// Local checks run before anything is sent.
    pub fn validate(&self) -> Result<()> {
        match self {
            OperationParameters::Transform(p) => p.validate(),
            OperationParameters::Interlink(p) => {
                require_profile(&p.profile)?;
                p.left.validate()?;
                p.right.validate()
            }
            OperationParameters::Fuse(p) => {
                require_profile(&p.profile)?;
                p.left.validate()?;
                p.right.validate()?;
                p.links.validate()
            }
            OperationParameters::Enrich(p) => {
                require_profile(&p.profile)?;
                p.source.validate()
            }
        }
    }
}

fn require_profile(profile: &str) -> Result<()> {
    if profile.trim().is_empty() {
        return Err(Error::validation("profile must not be empty"));
    }
    Ok(())
}

impl From<TransformParameters> for OperationParameters {
    fn from(p: TransformParameters) -> Self {
        OperationParameters::Transform(p)
    }
}

impl From<InterlinkParameters> for OperationParameters {
    fn from(p: InterlinkParameters) -> Self {
        OperationParameters::Interlink(p)
    }
}

impl From<FuseParameters> for OperationParameters {
    fn from(p: FuseParameters) -> Self {
        OperationParameters::Fuse(p)
    }
}

impl From<EnrichParameters> for OperationParameters {
    fn from(p: EnrichParameters) -> Self {
        OperationParameters::Enrich(p)
    }
}

/// A submitted operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationJob {
    pub id: i64,
    pub version: i64,
    pub kind: OperationKind,
    pub status: Status,
    /// Output artifact, present once the job is COMPLETED.
    pub output: Option<ExecutionFile>,
}

impl OperationJob {
    pub fn reference(&self) -> ProcessRef {
        ProcessRef::new(self.id, self.version)
    }

    /// The output as an input for a follow-up operation.
    pub fn output_source(&self) -> Option<DataSource> {
        self.output
            .as_ref()
            .map(|f| DataSource::process_output(self.reference(), f.id))
    }
}

impl From<&OperationJob> for ProcessRef {
    fn from(job: &OperationJob) -> Self {
        job.reference()
    }
}

#[derive(Debug, serde::Deserialize)]
struct SubmitReply {
    #[serde(alias = "processId")]
    id: i64,
    #[serde(alias = "processVersion")]
    version: i64,
    #[serde(default)]
    status: Option<Status>,
}

/// Toolkit profiles per component, e.g. `{"transform": ["OSM", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(transparent)]
pub struct Profiles(BTreeMap<String, Vec<String>>);

impl Profiles {
    pub fn for_kind(&self, kind: OperationKind) -> &[String] {
        self.0
            .get(kind.profile_key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Toolkit operation namespace, see [`Client::operations`].
#[derive(Debug, Clone, Copy)]
pub struct Operations<'a> {
    client: &'a Client,
}

impl<'a> Operations<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub fn profiles(&self) -> Result<Profiles> {
        self.client.get_json("toolkit/profiles")
    }

    /// Submits an operation. Parameters are validated first: malformed ones
    /// fail with [`Error::Validation`] without contacting the server.
    pub fn submit(
        &self,
        kind: OperationKind,
        parameters: &OperationParameters,
    ) -> Result<OperationJob> {
        if parameters.kind() != kind {
            return Err(Error::validation(format!(
                "{} parameters cannot be used for a {} operation",
                parameters.kind(),
                kind
            )));
        }
        parameters.validate()?;

        let reply: SubmitReply = self.client.post_json(kind.endpoint(), parameters)?;
        let job = OperationJob {
            id: reply.id,
            version: reply.version,
            kind,
            status: reply.status.unwrap_or(Status::Created),
            output: None,
        };
        tracing::info!(process = %job.reference(), %kind, "operation submitted");
        Ok(job)
    }

    pub fn transform(&self, parameters: TransformParameters) -> Result<OperationJob> {
        self.submit(OperationKind::Transform, &parameters.into())
    }

    pub fn interlink(
        &self,
        profile: &str,
        left: impl Into<DataSource>,
        right: impl Into<DataSource>,
    ) -> Result<OperationJob> {
        let p = InterlinkParameters {
            profile: profile.to_string(),
            left: left.into(),
            right: right.into(),
        };
        self.submit(OperationKind::Interlink, &p.into())
    }

    pub fn fuse(
        &self,
        profile: &str,
        left: impl Into<DataSource>,
        right: impl Into<DataSource>,
        links: impl Into<DataSource>,
    ) -> Result<OperationJob> {
        let p = FuseParameters {
            profile: profile.to_string(),
            left: left.into(),
            right: right.into(),
            links: links.into(),
        };
        self.submit(OperationKind::Fuse, &p.into())
    }

    pub fn enrich(&self, profile: &str, source: impl Into<DataSource>) -> Result<OperationJob> {
        let p = EnrichParameters {
            profile: profile.to_string(),
            source: source.into(),
        };
        self.submit(OperationKind::Enrich, &p.into())
    }

    /// Re-reads the job status. Once COMPLETED the OUTPUT file is attached.
    pub fn status(&self, job: &OperationJob) -> Result<OperationJob> {
        let descriptor = self.client.processes().status(job.reference())?;
        let output = if descriptor.status == Status::Completed {
            descriptor.files_of(ExecutionFileType::Output).last().cloned()
        } else {
            None
        };
        Ok(OperationJob {
            status: descriptor.status,
            output,
            ..job.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_data_formats_leniently() {
        assert_eq!("n-triples".parse::<DataFormat>().unwrap(), DataFormat::NTriples);
        assert_eq!("OSM_PBF".parse::<DataFormat>().unwrap(), DataFormat::OsmPbf);
        assert!(matches!("docx".parse::<DataFormat>(), Err(Error::Config { .. })));
        for f in DataFormat::ALL {
            assert_eq!(serde_json::to_value(f).unwrap(), json!(f.as_str()));
        }
    }

    #[test]
    fn serializes_data_sources() {
        assert_eq!(
            serde_json::to_value(DataSource::file("pois/athens.nt")).unwrap(),
            json!({"type": "FILESYSTEM", "path": "pois/athens.nt"})
        );
        assert_eq!(
            serde_json::to_value(DataSource::from((4, 2))).unwrap(),
            json!({"type": "CATALOG", "id": 4, "version": 2})
        );
        assert_eq!(
            serde_json::to_value(DataSource::from((7, 1, 33))).unwrap(),
            json!({"type": "PROCESS", "id": 7, "version": 1, "fileId": 33})
        );
    }

    #[test]
    fn serializes_transform_request() {
        let mut p = TransformParameters::csv("uploads/pois.csv", "OSM");
        p.configuration.attr_x = Some("lon".into());
        p.configuration.delimiter = Some(";".into());
        let v = serde_json::to_value(OperationParameters::from(p)).unwrap();
        assert_eq!(v["path"], "uploads/pois.csv");
        assert_eq!(v["configuration"]["inputFormat"], "CSV");
        assert_eq!(v["configuration"]["attrX"], "lon");
        assert_eq!(v["configuration"]["sourceCRS"], "EPSG:4326");
        assert_eq!(v["configuration"]["defaultLang"], "en");
        assert_eq!(v["configuration"]["encoding"], "UTF-8");
    }

    #[test]
    fn serializes_enrich_request() {
        let p = OperationParameters::from(EnrichParameters {
            profile: "default".into(),
            source: DataSource::catalog(3, 1),
        });
        let v = serde_json::to_value(p).unwrap();
        assert_eq!(v["profile"], "default");
        assert_eq!(v["input"]["type"], "CATALOG");
    }

    #[test]
    fn transform_configuration_rejects_unknown_keys() {
        let err = TransformConfiguration::from_json(&json!({"profile": "OSM", "colour": "red"}))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "{err}");

        let c = TransformConfiguration::from_json(&json!({"mappingSpec": "m.yml", "attrY": "lat"}))
            .unwrap();
        assert_eq!(c.attr_y.as_deref(), Some("lat"));
        assert_eq!(c.target_crs, "EPSG:4326");
    }

    #[test]
    fn transform_validation() {
        let mut p = TransformParameters::shapefile("a.shp", "OSM");
        p.validate().unwrap();

        p.configuration.attr_x = Some("x".into());
        assert!(matches!(p.validate(), Err(Error::Validation { .. })));

        let mut p = TransformParameters::csv("a.csv", "");
        assert!(matches!(p.validate(), Err(Error::Validation { .. })));
        p.configuration.mapping_spec = Some("mapping.yml".into());
        p.validate().unwrap();

        p.configuration.delimiter = Some(";;".into());
        assert!(matches!(p.validate(), Err(Error::Validation { .. })));
        p.configuration.delimiter = None;

        p.configuration.source_crs = "WGS84".into();
        assert!(matches!(p.validate(), Err(Error::Validation { .. })));
    }

    #[test]
    fn enrich_validation_rejects_malformed_parameters() {
        let bad_profile = OperationParameters::from(EnrichParameters {
            profile: " ".into(),
            source: DataSource::file("a.nt"),
        });
        assert!(matches!(bad_profile.validate(), Err(Error::Validation { .. })));

        let bad_source = OperationParameters::from(EnrichParameters {
            profile: "default".into(),
            source: DataSource::catalog(0, 1),
        });
        assert!(matches!(bad_source.validate(), Err(Error::Validation { .. })));
    }

    #[test]
    fn profiles_lookup() {
        let p: Profiles = serde_json::from_value(json!({
            "transform": ["OSM", "GEONAMES"],
            "interlink": ["default"]
        }))
        .unwrap();
        assert_eq!(p.for_kind(OperationKind::Transform).len(), 2);
        assert!(p.for_kind(OperationKind::Fuse).is_empty());
        assert_eq!(p.iter().count(), 2);
    }

    #[test]
    fn job_output_becomes_process_source() {
        let job = OperationJob {
            id: 9,
            version: 1,
            kind: OperationKind::Transform,
            status: Status::Completed,
            output: Some(ExecutionFile {
                id: 55,
                kind: ExecutionFileType::Output,
                name: "out.nt".into(),
                size: None,
            }),
        };
        assert_eq!(
            job.output_source(),
            Some(DataSource::ProcessOutput {
                id: 9,
                version: 1,
                file_id: 55
            })
        );
    }
}
