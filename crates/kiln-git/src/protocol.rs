//! Git smart HTTP protocol implementation.
//!
//! Implements the git smart HTTP protocol for fetch and push operations.
//! See: https://git-scm.com/docs/http-protocol

use crate::pack::{DecodeMode, PackBuilder, PackParser, UnpackReport, PACK_SIGNATURE};
use crate::pktline::{Band, PktLine, PktLineReader, PktLineWriter, MAX_SIDEBAND_DATA};
use crate::{GitError, Result};
use kiln_storage::{
    tag_target, validate_ref_name, Commit, EntryKind, GitObject, ObjectId, ObjectStore,
    ObjectType, Reference, Repository, Tree,
};
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

/// Agent string sent with every capability list.
pub const AGENT: &str = concat!("agent=kiln/", env!("CARGO_PKG_VERSION"));

/// Capabilities advertised for fetch.
const UPLOAD_CAPABILITIES: &[&str] = &["side-band", "side-band-64k", "no-progress"];

/// Capabilities advertised for push.
const RECEIVE_CAPABILITIES: &[&str] = &[
    "report-status",
    "delete-refs",
    "side-band-64k",
    "quiet",
    "ofs-delta",
];

/// Payload limit of the original (non-64k) sideband.
const SMALL_SIDEBAND_DATA: usize = 999;

/// The two smart HTTP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// `git-upload-pack`, used by fetch and clone.
    UploadPack,
    /// `git-receive-pack`, used by push.
    ReceivePack,
}

impl Service {
    /// Parses a `service=` query value.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "git-upload-pack" => Some(Self::UploadPack),
            "git-receive-pack" => Some(Self::ReceivePack),
            _ => None,
        }
    }

    /// Service name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Content type of the `info/refs` response.
    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-advertisement",
            Self::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type of the service response.
    pub fn result_content_type(&self) -> &'static str {
        match self {
            Self::UploadPack => "application/x-git-upload-pack-result",
            Self::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::UploadPack => UPLOAD_CAPABILITIES,
            Self::ReceivePack => RECEIVE_CAPABILITIES,
        }
    }
}

/// A reference advertisement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefAdvertisement {
    /// Object ID the ref points to.
    pub id: ObjectId,
    /// Reference name.
    pub name: String,
}

/// Collects the refs to advertise: `HEAD` first when it resolves, then
/// every branch and tag by name, with peeled `^{}` lines for annotated tags.
pub fn collect_refs(repo: &Repository) -> Result<Vec<RefAdvertisement>> {
    let mut refs = Vec::new();
    if let Some(head) = repo.head()? {
        refs.push(RefAdvertisement {
            id: head,
            name: "HEAD".to_string(),
        });
    }
    for (name, id) in repo.refs.list("refs/")? {
        let peeled = if name.starts_with("refs/tags/") {
            match repo.objects.try_get(&id)? {
                Some(object) if object.object_type == ObjectType::Tag => tag_target(&object.data),
                _ => None,
            }
        } else {
            None
        };
        refs.push(RefAdvertisement {
            id,
            name: name.clone(),
        });
        if let Some(target) = peeled {
            refs.push(RefAdvertisement {
                id: target,
                name: format!("{}^{{}}", name),
            });
        }
    }
    Ok(refs)
}

fn capability_list(repo: &Repository, service: Service, head_resolves: bool) -> Result<String> {
    let mut caps: Vec<String> = service.capabilities().iter().map(|c| c.to_string()).collect();
    if head_resolves {
        if let Some(Reference::Symbolic(target)) = repo.refs.get("HEAD")? {
            caps.push(format!("symref=HEAD:{}", target));
        }
    }
    caps.push(AGENT.to_string());
    Ok(caps.join(" "))
}

/// Advertises references to a client (`GET info/refs?service=...`).
pub fn advertise_refs<W: Write>(writer: &mut W, repo: &Repository, service: Service) -> Result<()> {
    let refs = collect_refs(repo)?;
    let head_resolves = refs.first().is_some_and(|r| r.name == "HEAD");
    let caps = capability_list(repo, service, head_resolves)?;

    let mut pkt_writer = PktLineWriter::new(writer);
    pkt_writer.write_line(&format!("# service={}", service.as_str()))?;
    pkt_writer.flush_pkt()?;

    match refs.split_first() {
        Some((first, rest)) => {
            pkt_writer.write_data(format!("{} {}\0{}\n", first.id, first.name, caps).as_bytes())?;
            for advert in rest {
                pkt_writer.write_line(&format!("{} {}", advert.id, advert.name))?;
            }
        }
        None => {
            pkt_writer.write_data(
                format!("{} capabilities^{{}}\0{}\n", ObjectId::zero(), caps).as_bytes(),
            )?;
        }
    }

    pkt_writer.flush_pkt()?;
    pkt_writer.flush()?;
    tracing::debug!(repo = %repo.name, service = service.as_str(), refs = refs.len(), "Advertised refs");
    Ok(())
}

fn parse_line_id(line: &str, prefix: &str) -> Result<ObjectId> {
    line.get(prefix.len()..prefix.len() + ObjectId::HEX_LEN)
        .and_then(|hex| ObjectId::from_hex(hex).ok())
        .ok_or_else(|| GitError::Protocol(format!("malformed line: {:?}", line)))
}

/// Want/Have negotiation for upload-pack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WantHave {
    /// Object IDs the client wants.
    pub wants: Vec<ObjectId>,
    /// Object IDs the client has.
    pub haves: Vec<ObjectId>,
    /// Capabilities requested on the first want line.
    pub capabilities: Vec<String>,
    /// Whether the client sent `done`.
    pub done: bool,
}

impl WantHave {
    /// Parses want/have lines from the client.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut pkt_reader = PktLineReader::new(reader);
        let mut request = Self::default();

        loop {
            match pkt_reader.read()? {
                Some(PktLine::Data(data)) => {
                    let line = String::from_utf8_lossy(&data);
                    let line = line.trim_end();
                    if line.starts_with("want ") {
                        request.wants.push(parse_line_id(line, "want ")?);
                        if request.wants.len() == 1 {
                            let caps = line.get(5 + ObjectId::HEX_LEN..).unwrap_or("");
                            request.capabilities =
                                caps.split_whitespace().map(str::to_string).collect();
                        }
                    } else if line.starts_with("have ") {
                        request.haves.push(parse_line_id(line, "have ")?);
                    } else if line == "done" {
                        request.done = true;
                        break;
                    }
                }
                // A flush separates wants from haves.
                Some(PktLine::Flush) | Some(PktLine::Delimiter) => continue,
                Some(PktLine::ResponseEnd) | None => break,
            }
        }

        Ok(request)
    }

    /// Returns true if the client asked for `cap`.
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }

    /// Largest sideband payload the client accepts, or `None` for a raw pack.
    pub fn sideband_limit(&self) -> Option<usize> {
        if self.has_capability("side-band-64k") {
            Some(MAX_SIDEBAND_DATA)
        } else if self.has_capability("side-band") {
            Some(SMALL_SIDEBAND_DATA)
        } else {
            None
        }
    }
}

/// Collects every object reachable from `wants`, stopping at `haves` and at
/// objects already collected.
pub fn collect_reachable(
    store: &ObjectStore,
    wants: &[ObjectId],
    haves: &[ObjectId],
) -> Result<Vec<GitObject>> {
    let mut visited: HashSet<ObjectId> = haves.iter().copied().collect();
    let mut stack: Vec<ObjectId> = Vec::new();
    for want in wants.iter().rev() {
        if !store.contains(want)? {
            return Err(GitError::ObjectNotFound(want.to_hex()));
        }
        stack.push(*want);
    }

    let mut objects = Vec::new();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(object) = store.try_get(&id)? else {
            tracing::warn!(id = %id, "Reachable object missing from store, skipping");
            continue;
        };

        match object.object_type {
            ObjectType::Commit => {
                let commit = Commit::parse(id, &object.data)?;
                for parent in commit.parents.iter().rev() {
                    stack.push(*parent);
                }
                stack.push(commit.tree);
            }
            ObjectType::Tree => {
                let tree = Tree::parse(id, &object.data)?;
                for entry in tree.entries.iter().rev() {
                    // Submodule commits live in another repository.
                    if entry.kind() != EntryKind::Commit {
                        stack.push(entry.id);
                    }
                }
            }
            ObjectType::Tag => {
                if let Some(target) = tag_target(&object.data) {
                    stack.push(target);
                }
            }
            ObjectType::Blob => {}
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Handles git-upload-pack (fetch/clone). Returns the number of objects sent.
pub fn upload_pack<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    repo: &Repository,
) -> Result<usize> {
    let request = WantHave::parse(reader)?;
    let mut pkt_writer = PktLineWriter::new(&mut *writer);

    if request.wants.is_empty() {
        pkt_writer.write_line("NAK")?;
        pkt_writer.flush_pkt()?;
        pkt_writer.flush()?;
        return Ok(0);
    }

    let objects = collect_reachable(&repo.objects, &request.wants, &request.haves)?;
    let count = objects.len();
    let mut builder = PackBuilder::new();
    for object in objects {
        builder.add(object);
    }
    let pack = builder.build()?;

    // No common-ancestor negotiation: always NAK.
    pkt_writer.write_line("NAK")?;
    match request.sideband_limit() {
        Some(limit) => {
            for chunk in pack.chunks(limit) {
                pkt_writer.write_sideband(Band::Data, chunk)?;
            }
            pkt_writer.flush_pkt()?;
            pkt_writer.flush()?;
        }
        None => {
            let inner = pkt_writer.into_inner();
            inner.write_all(&pack)?;
            inner.flush()?;
        }
    }

    tracing::info!(
        repo = %repo.name,
        wants = request.wants.len(),
        haves = request.haves.len(),
        objects = count,
        bytes = pack.len(),
        "Served upload-pack"
    );
    Ok(count)
}

/// A ref update command from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Old object ID (zeros for create).
    pub old_id: ObjectId,
    /// New object ID (zeros for delete).
    pub new_id: ObjectId,
    /// Reference name.
    pub ref_name: String,
}

impl Command {
    /// Parses `<old> <new> <ref>`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.trim_end().splitn(3, ' ');
        let (Some(old), Some(new), Some(ref_name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GitError::Protocol(format!("malformed command: {:?}", line)));
        };
        let parse_id = |hex: &str| {
            ObjectId::from_hex(hex)
                .map_err(|_| GitError::Protocol(format!("malformed object id: {:?}", hex)))
        };
        Ok(Self {
            old_id: parse_id(old)?,
            new_id: parse_id(new)?,
            ref_name: ref_name.to_string(),
        })
    }

    /// Checks if this is a create command.
    pub fn is_create(&self) -> bool {
        self.old_id.is_zero()
    }

    /// Checks if this is a delete command.
    pub fn is_delete(&self) -> bool {
        self.new_id.is_zero()
    }

    fn expected(&self) -> Option<ObjectId> {
        (!self.is_create()).then_some(self.old_id)
    }

    fn target(&self) -> Option<ObjectId> {
        (!self.is_delete()).then_some(self.new_id)
    }
}

/// A parsed receive-pack request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveRequest<'a> {
    /// Ref update commands.
    pub commands: Vec<Command>,
    /// Capabilities from the first command line.
    pub capabilities: Vec<String>,
    /// Pack data starting at the `PACK` magic, if present.
    pub pack: Option<&'a [u8]>,
}

impl<'a> ReceiveRequest<'a> {
    /// Splits a request body into commands and the appended pack.
    pub fn parse(body: &'a [u8]) -> Result<Self> {
        let mut pkt_reader = PktLineReader::new(Cursor::new(body));
        let mut request = Self::default();

        loop {
            match pkt_reader.read()? {
                Some(PktLine::Data(data)) => {
                    let (line, caps) = match data.iter().position(|&b| b == 0) {
                        Some(nul) => (&data[..nul], Some(&data[nul + 1..])),
                        None => (&data[..], None),
                    };
                    let line = String::from_utf8_lossy(line);
                    // shallow lines precede commands; this server never sends shallow refs
                    if line.starts_with("shallow ") {
                        continue;
                    }
                    request.commands.push(Command::parse(&line)?);
                    if let Some(caps) = caps {
                        request.capabilities = String::from_utf8_lossy(caps)
                            .split_whitespace()
                            .map(str::to_string)
                            .collect();
                    }
                }
                Some(PktLine::Flush) | None => break,
                Some(_) => continue,
            }
        }

        let rest = &body[pkt_reader.into_inner().position() as usize..];
        request.pack = rest
            .windows(PACK_SIGNATURE.len())
            .position(|window| window == PACK_SIGNATURE)
            .map(|start| &rest[start..]);
        Ok(request)
    }

    /// Returns true if the client asked for `cap`.
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }
}

/// Result of one ref update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    /// Reference name.
    pub ref_name: String,
    /// `Ok` or the reason sent to the client.
    pub result: std::result::Result<(), String>,
}

/// Everything receive-pack did.
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    /// Pack decoding outcome; `Err` carries the unpack error sent to the client.
    pub unpack: std::result::Result<UnpackReport, String>,
    /// One status per command, in request order.
    pub statuses: Vec<CommandStatus>,
}

impl ReceiveReport {
    /// True when unpacking succeeded and every ref was updated.
    pub fn all_ok(&self) -> bool {
        self.unpack.is_ok() && self.statuses.iter().all(|s| s.result.is_ok())
    }
}

fn apply_command(repo: &Repository, command: &Command) -> Result<std::result::Result<(), String>> {
    let name = &command.ref_name;
    if !name.starts_with("refs/") || validate_ref_name(name).is_err() {
        return Ok(Err("invalid ref name".to_string()));
    }
    if let Some(new_id) = command.target() {
        match repo.objects.try_get(&new_id)? {
            Some(object)
                if matches!(object.object_type, ObjectType::Commit | ObjectType::Tag) => {}
            Some(_) => return Ok(Err("not a commit".to_string())),
            None => return Ok(Err("missing object".to_string())),
        }
    }
    if repo
        .refs
        .update_ref(name, command.expected(), command.target())?
    {
        Ok(Ok(()))
    } else {
        tracing::warn!(repo = %repo.name, ref_name = %name, "Rejected stale ref update");
        Ok(Err("stale old value".to_string()))
    }
}

/// Handles git-receive-pack (push).
///
/// The pack is decoded with `mode`; then every command is applied through
/// the ref store's compare-and-swap with the client's old value as the
/// expectation. A body without a pack is a push of no objects.
pub fn receive_pack<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    repo: &Repository,
    mode: DecodeMode,
) -> Result<ReceiveReport> {
    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    let request = ReceiveRequest::parse(&body)?;

    let unpack = match request.pack {
        Some(pack) => match PackParser::new(pack).with_mode(mode).parse(&repo.objects) {
            Ok(report) => Ok(report),
            Err(e @ (GitError::Storage(_) | GitError::Io(_))) => return Err(e),
            Err(e) => {
                tracing::warn!(repo = %repo.name, error = %e, "Rejected pack");
                Err(e.to_string())
            }
        },
        None => Ok(UnpackReport {
            entries: Vec::new(),
            checksum_ok: true,
        }),
    };

    let mut statuses = Vec::with_capacity(request.commands.len());
    for command in &request.commands {
        let result = match &unpack {
            Ok(_) => apply_command(repo, command)?,
            Err(_) => Err("unpacker error".to_string()),
        };
        statuses.push(CommandStatus {
            ref_name: command.ref_name.clone(),
            result,
        });
    }

    let report = ReceiveReport { unpack, statuses };
    write_receive_status(writer, &request, &report)?;

    tracing::info!(
        repo = %repo.name,
        commands = report.statuses.len(),
        objects = report.unpack.as_ref().map(|u| u.stored().len()).unwrap_or(0),
        ok = report.all_ok(),
        "Processed receive-pack"
    );
    Ok(report)
}

fn write_receive_status<W: Write>(
    writer: &mut W,
    request: &ReceiveRequest<'_>,
    report: &ReceiveReport,
) -> Result<()> {
    let mut pkt_writer = PktLineWriter::new(writer);
    if !request.has_capability("report-status") {
        pkt_writer.flush_pkt()?;
        return pkt_writer.flush();
    }

    let mut status = PktLineWriter::new(Vec::new());
    match &report.unpack {
        Ok(_) => status.write_line("unpack ok")?,
        Err(e) => status.write_line(&format!("unpack {}", e))?,
    }
    for command in &report.statuses {
        match &command.result {
            Ok(()) => status.write_line(&format!("ok {}", command.ref_name))?,
            Err(reason) => status.write_line(&format!("ng {} {}", command.ref_name, reason))?,
        }
    }
    status.flush_pkt()?;
    let status = status.into_inner();

    if request.has_capability("side-band-64k") || request.has_capability("side-band") {
        pkt_writer.write_sideband(Band::Data, &status)?;
        pkt_writer.flush_pkt()?;
    } else {
        pkt_writer.into_inner().write_all(&status)?;
        return Ok(());
    }
    pkt_writer.flush()
}
