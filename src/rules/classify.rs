use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::core::{ClassifiedFinding, Confidence, CorrelatedFinding, Protocol, ServiceCategory};
use crate::error::ScanError;

use ServiceCategory::{Database, FileSharing, RemoteAccess, SystemService, WebServer};

/// What a classification rule looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Matcher {
    /// Case-insensitive glob on the executable's file name.
    Executable { glob: String },
    /// Local port, optionally restricted to one protocol.
    Port {
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<Protocol>,
    },
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Executable { glob } => write!(f, "executable {glob}"),
            Matcher::Port {
                port,
                protocol: Some(protocol),
            } => write!(f, "port {port}/{protocol}"),
            Matcher::Port {
                port,
                protocol: None,
            } => write!(f, "port {port}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    #[serde(flatten)]
    pub matcher: Matcher,
    pub category: ServiceCategory,
    pub service: String,
}

impl ClassificationRule {
    pub fn executable(glob: &str, category: ServiceCategory, service: &str) -> Self {
        Self {
            matcher: Matcher::Executable {
                glob: glob.to_string(),
            },
            category,
            service: service.to_string(),
        }
    }

    pub fn port(
        port: u16,
        protocol: Option<Protocol>,
        category: ServiceCategory,
        service: &str,
    ) -> Self {
        Self {
            matcher: Matcher::Port { port, protocol },
            category,
            service: service.to_string(),
        }
    }
}

const EXECUTABLE_SIGNATURES: &[(&str, ServiceCategory, &str)] = &[
    ("{mysqld,mysqld.exe}", Database, "MySQL"),
    ("{mariadbd,mariadbd.exe}", Database, "MariaDB"),
    ("{postgres,postgres.exe}", Database, "PostgreSQL"),
    ("postmaster", Database, "PostgreSQL"),
    ("sqlservr.exe", Database, "Microsoft SQL Server"),
    ("{tnslsnr,tnslsnr.exe}", Database, "Oracle"),
    ("{oracle,oracle.exe}", Database, "Oracle"),
    ("{redis-server,redis-server.exe}", Database, "Redis"),
    ("{mongod,mongod.exe}", Database, "MongoDB"),
    ("{memcached,memcached.exe}", Database, "Memcached"),
    ("elasticsearch*", Database, "Elasticsearch"),
    ("couchdb*", Database, "CouchDB"),
    ("cassandra*", Database, "Cassandra"),
    ("smbd", FileSharing, "Samba"),
    ("nmbd", FileSharing, "NetBIOS"),
    ("nfsd", FileSharing, "NFS"),
    ("rpc.mountd", FileSharing, "NFS"),
    ("vsftpd", FileSharing, "FTP"),
    ("proftpd", FileSharing, "FTP"),
    ("pure-ftpd", FileSharing, "FTP"),
    ("{tftpd,in.tftpd}", FileSharing, "TFTP"),
    ("rsync", FileSharing, "rsync"),
    ("AppleFileServer", FileSharing, "AFP"),
    ("{nginx,nginx.exe}", WebServer, "nginx"),
    ("apache2", WebServer, "Apache"),
    ("{httpd,httpd.exe}", WebServer, "Apache httpd"),
    ("{caddy,caddy.exe}", WebServer, "Caddy"),
    ("lighttpd", WebServer, "lighttpd"),
    ("w3wp.exe", WebServer, "IIS"),
    ("{sshd,sshd.exe}", RemoteAccess, "SSH"),
    ("{telnetd,in.telnetd}", RemoteAccess, "Telnet"),
    ("xrdp", RemoteAccess, "RDP"),
    ("{Xvnc,x11vnc}", RemoteAccess, "VNC"),
    ("vncserver*", RemoteAccess, "VNC"),
    ("TeamViewer*", RemoteAccess, "TeamViewer"),
    ("systemd-resolved", SystemService, "DNS resolver"),
    ("dnsmasq", SystemService, "DNS"),
    ("named", SystemService, "DNS"),
    ("cupsd", SystemService, "CUPS"),
    ("avahi-daemon*", SystemService, "mDNS"),
    ("mDNSResponder", SystemService, "mDNS"),
    ("rpcbind", SystemService, "RPC portmapper"),
    ("chronyd", SystemService, "NTP"),
    ("ntpd", SystemService, "NTP"),
    ("snmpd", SystemService, "SNMP"),
    ("sendmail", SystemService, "SMTP"),
    ("exim4", SystemService, "SMTP"),
    ("dovecot", SystemService, "IMAP/POP3"),
];

const TCP: Option<Protocol> = Some(Protocol::Tcp);
const UDP: Option<Protocol> = Some(Protocol::Udp);

const WELL_KNOWN_PORTS: &[(u16, Option<Protocol>, ServiceCategory, &str)] = &[
    (3306, TCP, Database, "MySQL"),
    (5432, TCP, Database, "PostgreSQL"),
    (1433, TCP, Database, "Microsoft SQL Server"),
    (1521, TCP, Database, "Oracle"),
    (6379, TCP, Database, "Redis"),
    (27017, TCP, Database, "MongoDB"),
    (11211, None, Database, "Memcached"),
    (9200, TCP, Database, "Elasticsearch"),
    (5984, TCP, Database, "CouchDB"),
    (9042, TCP, Database, "Cassandra"),
    (445, TCP, FileSharing, "SMB"),
    (139, TCP, FileSharing, "SMB"),
    (137, UDP, FileSharing, "NetBIOS"),
    (138, UDP, FileSharing, "NetBIOS"),
    (2049, None, FileSharing, "NFS"),
    (21, TCP, FileSharing, "FTP"),
    (69, UDP, FileSharing, "TFTP"),
    (548, TCP, FileSharing, "AFP"),
    (873, TCP, FileSharing, "rsync"),
    (80, TCP, WebServer, "HTTP"),
    (8080, TCP, WebServer, "HTTP"),
    (8000, TCP, WebServer, "HTTP"),
    (443, TCP, WebServer, "HTTPS"),
    (8443, TCP, WebServer, "HTTPS"),
    (22, TCP, RemoteAccess, "SSH"),
    (23, TCP, RemoteAccess, "Telnet"),
    (3389, None, RemoteAccess, "RDP"),
    (5900, TCP, RemoteAccess, "VNC"),
    (5901, TCP, RemoteAccess, "VNC"),
    (5902, TCP, RemoteAccess, "VNC"),
    (5903, TCP, RemoteAccess, "VNC"),
    (5985, TCP, RemoteAccess, "WinRM"),
    (5986, TCP, RemoteAccess, "WinRM"),
    (53, None, SystemService, "DNS"),
    (25, TCP, SystemService, "SMTP"),
    (110, TCP, SystemService, "POP3"),
    (143, TCP, SystemService, "IMAP"),
    (993, TCP, SystemService, "IMAPS"),
    (995, TCP, SystemService, "POP3S"),
    (123, UDP, SystemService, "NTP"),
    (161, UDP, SystemService, "SNMP"),
    (111, None, SystemService, "RPC portmapper"),
    (631, None, SystemService, "CUPS"),
    (5353, UDP, SystemService, "mDNS"),
    (135, TCP, SystemService, "Windows RPC"),
];

/// The built-in rule table: executable signatures first, then well-known
/// ports.
pub fn builtin_rules() -> Vec<ClassificationRule> {
    let executables = EXECUTABLE_SIGNATURES
        .iter()
        .map(|(glob, category, service)| ClassificationRule::executable(glob, *category, service));
    let ports = WELL_KNOWN_PORTS
        .iter()
        .map(|(port, protocol, category, service)| {
            ClassificationRule::port(*port, *protocol, *category, service)
        });
    executables.chain(ports).collect()
}

#[derive(Debug, Clone)]
struct CompiledExecutable {
    matcher: GlobMatcher,
    rule: ClassificationRule,
}

/// Compiled classification table. Process identity is tried before ports;
/// within each kind, caller-supplied rules come before the built-ins and the
/// first matching rule wins.
#[derive(Debug, Clone)]
pub struct Classifier {
    executables: Vec<CompiledExecutable>,
    ports: Vec<ClassificationRule>,
}

impl Classifier {
    pub fn new(extra: &[ClassificationRule]) -> Result<Self, ScanError> {
        let mut executables = Vec::new();
        let mut ports = Vec::new();
        for rule in extra.iter().cloned().chain(builtin_rules()) {
            let compiled = match &rule.matcher {
                Matcher::Executable { glob } => Some(compile_glob(glob)?),
                Matcher::Port { .. } => None,
            };
            match compiled {
                Some(matcher) => executables.push(CompiledExecutable { matcher, rule }),
                None => ports.push(rule),
            }
        }
        Ok(Self { executables, ports })
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &ClassificationRule> {
        self.executables
            .iter()
            .map(|c| &c.rule)
            .chain(self.ports.iter())
    }

    pub fn classify(&self, finding: CorrelatedFinding) -> ClassifiedFinding {
        if let Some(rule) = self.match_identity(&finding) {
            let (category, service) = (rule.category, Some(rule.service.clone()));
            return ClassifiedFinding {
                finding,
                category,
                confidence: Confidence::High,
                service,
            };
        }
        if let Some(rule) = self.match_port(&finding) {
            let (category, service) = (rule.category, Some(rule.service.clone()));
            return ClassifiedFinding {
                finding,
                category,
                confidence: Confidence::Medium,
                service,
            };
        }
        ClassifiedFinding {
            finding,
            category: ServiceCategory::Unknown,
            confidence: Confidence::Low,
            service: None,
        }
    }

    fn match_identity(&self, finding: &CorrelatedFinding) -> Option<&ClassificationRule> {
        let candidates = finding.process.as_ref()?.identity_candidates();
        if candidates.is_empty() {
            return None;
        }
        self.executables
            .iter()
            .find(|c| candidates.iter().any(|name| c.matcher.is_match(name)))
            .map(|c| &c.rule)
    }

    fn match_port(&self, finding: &CorrelatedFinding) -> Option<&ClassificationRule> {
        let socket = &finding.socket;
        self.ports.iter().find(|rule| match rule.matcher {
            Matcher::Port { port, protocol } => {
                port == socket.local_port && protocol.is_none_or(|p| p == socket.protocol)
            }
            Matcher::Executable { .. } => false,
        })
    }
}

fn compile_glob(glob: &str) -> Result<GlobMatcher, ScanError> {
    let glob = GlobBuilder::new(glob)
        .case_insensitive(true)
        .literal_separator(true)
        .build()
        .map_err(|err| {
            ScanError::Configuration(format!("invalid executable glob {glob:?}: {err}"))
        })?;
    Ok(glob.compile_matcher())
}
