/*!
The `package` module models the resources of a device package: the main
payload, its manifest, and the samples it references, each tagged with a hash
and size. Serializing the resources into an archive (and parsing one back) is
the job of an external packaging collaborator; this crate stops at the
resource model.
!*/

use log::debug;

/// What a resource is to the package.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    None,
    Main,
    Manifest,
    Sample,
}

/// A named binary blob inside a package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub hash: u32,
    pub size: u32,
    pub path: String,
    pub data: Vec<u8>,
}

impl Resource {
    pub fn new(kind: ResourceKind, path: String, data: Vec<u8>) -> Self {
        let hash = crc32fast::hash(&data);
        let size = data.len() as u32;
        Self {
            kind,
            hash,
            size,
            path,
            data,
        }
    }
}

/// The flavor of payload a package carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PackageKind {
    Sound = 1,
    Project = 2,
}

/// A package under construction.
#[derive(Debug)]
pub struct Package {
    name: String,
    fw_version: String,
    kind: PackageKind,
    resources: Vec<Resource>,
}

impl Package {
    pub fn begin(name: String, fw_version: String, kind: PackageKind) -> Self {
        debug!("beginning package '{}' ({:?})", name, kind);
        Self {
            name,
            fw_version,
            kind,
            resources: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fw_version(&self) -> &str {
        &self.fw_version
    }

    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    pub fn add_resource(&mut self, resource: Resource) {
        debug!(
            "adding {:?} resource '{}' ({} bytes, {:#010x})",
            resource.kind, resource.path, resource.size, resource.hash
        );
        self.resources.push(resource);
    }

    pub fn manifest(&self) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|resource| resource.kind == ResourceKind::Manifest)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Finishes the package, handing its resources to the archiver.
    pub fn end(self) -> Vec<Resource> {
        debug!("ending package '{}'", self.name);
        self.resources
    }
}
