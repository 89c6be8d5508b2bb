//! Namecheap DNS: points the tenant domain at the frontend.
//!
//! `setHosts` replaces the whole host list of a domain, so the stage reads
//! the current records with `getHosts`, swaps in its CNAME and writes the
//! merged list back.

use async_trait::async_trait;
use regex::Regex;

use super::http::{ApiClient, Auth};
use super::{kinds, HttpConfig, NamecheapConfig};
use crate::context::ProvisioningContext;
use crate::core::{fields, Criticality, ResourceHandle, StageOutcome};
use crate::errors::ProvisionError;
use crate::stages::Stage;

/// Handle fields recorded by the DNS stage.
pub mod record {
    /// Host label inside the zone.
    pub const HOST: &str = "record_host";
    /// Record type.
    pub const TYPE: &str = "record_type";
    /// Record target.
    pub const TARGET: &str = "target";
    /// Record TTL in seconds.
    pub const TTL: &str = "ttl";
}

/// A domain split into the parts Namecheap addresses separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParts {
    /// Host label below the registrable domain.
    pub host: String,
    /// Second-level domain.
    pub sld: String,
    /// Top-level domain.
    pub tld: String,
}

impl DomainParts {
    /// Splits `app.acme.com` into host `app`, SLD `acme`, TLD `com`.
    ///
    /// Only single-label TLDs are recognised. A bare registrable domain is
    /// rejected: a CNAME cannot sit at the zone apex next to its MX and TXT
    /// records.
    pub fn parse(domain: &str) -> Result<Self, ProvisionError> {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
            return Err(ProvisionError::permanent(format!("'{domain}' is not a registrable domain")));
        }

        let (sub, registrable) = labels.split_at(labels.len() - 2);
        if sub.is_empty() {
            return Err(ProvisionError::permanent(format!(
                "'{domain}' is a zone apex; use a subdomain such as app.{domain}"
            )));
        }
        Ok(Self {
            host: sub.join("."),
            sld: registrable[0].to_string(),
            tld: registrable[1].to_string(),
        })
    }
}

/// One host record as Namecheap reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// Host label.
    pub name: String,
    /// Record type, upper case.
    pub record_type: String,
    /// Record value.
    pub address: String,
    /// TTL in seconds.
    pub ttl: u32,
    /// MX preference.
    pub mx_pref: Option<u32>,
}

/// Replaces every record on `target.name` with `target`.
#[must_use]
pub fn merge_hosts(existing: &[HostRecord], target: HostRecord) -> Vec<HostRecord> {
    let mut merged: Vec<HostRecord> = existing
        .iter()
        .filter(|r| !r.name.eq_ignore_ascii_case(&target.name))
        .cloned()
        .collect();
    merged.push(target);
    merged
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Regex-based reader for the flat Namecheap XML responses.
#[derive(Debug, Clone)]
struct XmlReader {
    status: Regex,
    error: Regex,
    host: Regex,
    attr: Regex,
}

impl XmlReader {
    fn new() -> Result<Self, ProvisionError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ProvisionError::permanent(format!("invalid pattern: {e}")))
        };
        Ok(Self {
            status: compile(r#"<ApiResponse[^>]*\sStatus="([A-Za-z]+)""#)?,
            error: compile(r"<Error[^>]*>([^<]*)</Error>")?,
            host: compile(r"<host\s([^>]*?)/?>")?,
            attr: compile(r#"(\w+)="([^"]*)""#)?,
        })
    }

    /// Fails with the first reported error unless the response is `OK`.
    fn check(&self, command: &str, body: &str) -> Result<(), ProvisionError> {
        let status = self.status.captures(body).map(|c| c[1].to_string());
        if status.as_deref() == Some("OK") {
            return Ok(());
        }
        let detail = self
            .error
            .captures(body)
            .map_or_else(|| "response carried no status".to_string(), |c| unescape_xml(c[1].trim()));
        Err(ProvisionError::permanent(format!("namecheap {command}: {detail}")))
    }

    fn hosts(&self, body: &str) -> Vec<HostRecord> {
        self.host
            .captures_iter(body)
            .map(|caps| {
                let mut record = HostRecord {
                    name: String::new(),
                    record_type: String::new(),
                    address: String::new(),
                    ttl: 1800,
                    mx_pref: None,
                };
                for attr in self.attr.captures_iter(&caps[1]) {
                    let value = unescape_xml(&attr[2]);
                    match &attr[1] {
                        "Name" => record.name = value,
                        "Type" => record.record_type = value.to_ascii_uppercase(),
                        "Address" => record.address = value,
                        "TTL" => record.ttl = value.parse().unwrap_or(record.ttl),
                        "MXPref" => record.mx_pref = value.parse().ok(),
                        _ => {}
                    }
                }
                record
            })
            .collect()
    }
}

/// Creates the CNAME for the tenant domain.
#[derive(Debug, Clone)]
pub struct CreateDnsRecordStage {
    api: ApiClient,
    config: NamecheapConfig,
    xml: XmlReader,
}

impl CreateDnsRecordStage {
    /// Creates the stage.
    pub fn new(config: NamecheapConfig, http: &HttpConfig) -> Result<Self, ProvisionError> {
        let api = ApiClient::new(config.endpoint.clone(), Auth::None, http)?;
        Ok(Self {
            api,
            config,
            xml: XmlReader::new()?,
        })
    }

    fn auth_params(&self, command: &str, parts: &DomainParts) -> Vec<(&'static str, String)> {
        vec![
            ("ApiUser", self.config.api_user.clone()),
            ("ApiKey", self.config.api_key.expose().to_string()),
            ("UserName", self.config.api_user.clone()),
            ("ClientIp", self.config.client_ip.clone()),
            ("Command", command.to_string()),
            ("SLD", parts.sld.clone()),
            ("TLD", parts.tld.clone()),
        ]
    }

    fn target_record(&self, parts: &DomainParts) -> HostRecord {
        HostRecord {
            name: parts.host.clone(),
            record_type: "CNAME".to_string(),
            address: self.config.cname_target.clone(),
            ttl: self.config.ttl,
            mx_pref: None,
        }
    }

    fn handle(domain: &str, entry: &HostRecord) -> ResourceHandle {
        ResourceHandle::new()
            .with(fields::NAME, domain)
            .with(record::HOST, entry.name.clone())
            .with(record::TYPE, entry.record_type.clone())
            .with(record::TARGET, entry.address.clone())
            .with(record::TTL, entry.ttl.to_string())
    }

    async fn call(
        &self,
        ctx: &ProvisioningContext,
        command: &str,
        params: &[(&str, String)],
    ) -> Result<String, ProvisionError> {
        let body = self.api.get_text(ctx.cancel_scope(), "", params).await?;
        self.xml.check(command, &body)?;
        Ok(body)
    }

    async fn get_hosts(
        &self,
        ctx: &ProvisioningContext,
        parts: &DomainParts,
    ) -> Result<Vec<HostRecord>, ProvisionError> {
        let command = "namecheap.domains.dns.getHosts";
        let body = self.call(ctx, command, &self.auth_params(command, parts)).await?;
        Ok(self.xml.hosts(&body))
    }

    async fn set_hosts(
        &self,
        ctx: &ProvisioningContext,
        parts: &DomainParts,
        hosts: &[HostRecord],
    ) -> Result<(), ProvisionError> {
        let command = "namecheap.domains.dns.setHosts";
        let mut indexed: Vec<(String, String)> = Vec::with_capacity(hosts.len() * 5);
        for (i, host) in hosts.iter().enumerate() {
            let n = i + 1;
            indexed.push((format!("HostName{n}"), host.name.clone()));
            indexed.push((format!("RecordType{n}"), host.record_type.clone()));
            indexed.push((format!("Address{n}"), host.address.clone()));
            indexed.push((format!("TTL{n}"), host.ttl.to_string()));
            if let Some(pref) = host.mx_pref {
                indexed.push((format!("MXPref{n}"), pref.to_string()));
            }
        }

        let mut query: Vec<(&str, String)> = self.auth_params(command, parts);
        query.extend(indexed.iter().map(|(k, v)| (k.as_str(), v.clone())));
        self.call(ctx, command, &query).await?;
        Ok(())
    }

    async fn create(&self, ctx: &ProvisioningContext, domain: &str) -> Result<ResourceHandle, ProvisionError> {
        let parts = DomainParts::parse(domain)?;
        let target = self.target_record(&parts);

        let existing = self.get_hosts(ctx, &parts).await?;
        let merged = merge_hosts(&existing, target.clone());
        self.set_hosts(ctx, &parts, &merged).await?;

        Ok(Self::handle(domain, &target))
    }
}

#[async_trait]
impl Stage for CreateDnsRecordStage {
    fn name(&self) -> &str {
        "create-dns-record"
    }

    fn resource_kind(&self) -> &str {
        kinds::DNS
    }

    fn criticality(&self) -> Criticality {
        Criticality::NonFatal
    }

    async fn discover(&self, ctx: &ProvisioningContext) -> Result<Option<ResourceHandle>, ProvisionError> {
        let Some(domain) = ctx.tenant().domain.as_deref() else {
            return Ok(None);
        };
        let parts = DomainParts::parse(domain)?;
        let target = self.target_record(&parts);

        let existing = self.get_hosts(ctx, &parts).await?;
        let found = existing.iter().find(|r| {
            r.name.eq_ignore_ascii_case(&target.name)
                && r.record_type == target.record_type
                && r.address.trim_end_matches('.').eq_ignore_ascii_case(&target.address)
        });
        Ok(found.map(|r| Self::handle(domain, r)))
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        let Some(domain) = ctx.tenant().domain.as_deref() else {
            return StageOutcome::skipped("no domain requested");
        };
        self.create(ctx, domain).await.into()
    }
}
