// # EC2 Control Plane
//
// This crate provides the EC2 implementation of `ControlPlane` for the ENI
// reconciler.
//
// ## Implementation Status
//
// - ✅ One API call per trait method (no batching, no hidden follow-up calls)
// - ✅ Full error propagation to the engine (ordering and compensation live there)
// - ✅ Instance metadata via IMDSv2 (session token, then value)
// - ✅ Dry-run mode: every read is performed, every mutation is logged and skipped
// - ❌ NO retry logic (a later cycle repairs partial progress)
// - ❌ NO caching (each cycle loads a fresh snapshot)
// - ❌ NO background tasks
//
// ## Credentials
//
// Credentials come from the default AWS provider chain (environment, profile,
// instance role). A named profile can be selected through configuration.
// Credentials never appear in logs or in the Debug output of the client.
//
// ## API Reference
//
// - DescribeInstances, DescribeAddresses, DescribeNetworkInterfaces
// - CreateNetworkInterface, AttachNetworkInterface, AssignPrivateIpAddresses
// - AllocateAddress, AssociateAddress, DisassociateAddress, ReleaseAddress
// - IMDSv2: PUT `/latest/api/token`, GET `/latest/meta-data/{path}`

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::Client;
use aws_sdk_ec2::config::Region;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::{
    Address, DomainType, Filter, Instance, InstanceNetworkInterface, NetworkInterface, Reservation,
};
use eni_core::config::ControlPlaneConfig;
use eni_core::snapshot::{InstanceDescription, InterfaceView, PrivateAddress, PublicAddressRecord};
use eni_core::traits::{
    Allocation, AssociateAddressRequest, AttachInterfaceRequest, ControlPlane,
    ControlPlaneFactory, CreateInterfaceRequest,
};
use eni_core::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Provider name used in logs and errors
const PROVIDER: &str = "ec2";

/// Instance metadata service base URL
const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254";

/// Lifetime requested for IMDSv2 session tokens
const METADATA_TOKEN_TTL_SECS: u32 = 21600;

/// Default HTTP timeout for metadata requests
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// EC2 control-plane client
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the client will:
/// - Perform all describe calls and the metadata fetch
/// - Log every intended mutation with its parameters
/// - **NOT** change any remote state, returning synthetic handles instead
pub struct Ec2ControlPlane {
    /// EC2 API client
    client: Client,

    /// HTTP client for the metadata service
    http: reqwest::Client,

    /// Metadata service base URL
    metadata_endpoint: String,

    /// Dry-run mode: if true, skip every mutating call
    dry_run: bool,

    /// Counter for synthetic dry-run handles
    dry_run_seq: AtomicU64,
}

// Custom Debug implementation; the SDK client carries credential providers
impl std::fmt::Debug for Ec2ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2ControlPlane")
            .field("client", &"<REDACTED>")
            .field("metadata_endpoint", &self.metadata_endpoint)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Ec2ControlPlane {
    /// Create a client from an existing SDK client
    ///
    /// # Errors
    ///
    /// Fails if the metadata HTTP client cannot be built.
    pub fn new(client: Client, dry_run: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_METADATA_TIMEOUT)
            .build()
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            dry_run,
            dry_run_seq: AtomicU64::new(0),
        })
    }

    /// Create a client by resolving region, credentials and endpoint
    ///
    /// # Parameters
    ///
    /// - `region`: Region to operate in
    /// - `endpoint_url`: Optional endpoint override (e.g. a local emulator)
    /// - `profile`: Optional named credentials profile
    /// - `dry_run`: If true, perform reads but skip mutations
    pub async fn connect(
        region: &str,
        endpoint_url: Option<&str>,
        profile: Option<&str>,
        dry_run: bool,
    ) -> Result<Self> {
        if region.is_empty() {
            return Err(Error::config("EC2 region cannot be empty"));
        }

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        if let Some(name) = profile {
            loader = loader.profile_name(name);
        }
        let sdk_config = loader.load().await;

        tracing::debug!(
            "EC2 client configured for region {} (endpoint override: {})",
            region,
            endpoint_url.is_some()
        );

        Self::new(Client::new(&sdk_config), dry_run)
    }

    /// Use a different metadata service base URL
    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Whether mutations are skipped
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Next synthetic handle for a skipped mutation
    fn dry_run_handle(&self, prefix: &str) -> String {
        let n = self.dry_run_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-dryrun{:08x}", prefix, n)
    }

    /// Fetch an IMDSv2 session token
    async fn metadata_token(&self) -> Result<String> {
        let url = format!("{}/latest/api/token", self.metadata_endpoint);
        let response = self
            .http
            .put(&url)
            .header(
                "X-aws-ec2-metadata-token-ttl-seconds",
                METADATA_TOKEN_TTL_SECS.to_string(),
            )
            .send()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Metadata token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::provider(
                PROVIDER,
                format!("Metadata token request failed: {}", response.status()),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to read metadata token: {}", e)))
    }
}

/// Map an SDK error into a provider error with full context
fn sdk_error<E: std::error::Error>(operation: &str, err: E) -> Error {
    Error::provider(
        PROVIDER,
        format!("{} failed: {}", operation, DisplayErrorContext(&err)),
    )
}

/// Parse an IPv4 address reported by the API
fn parse_ipv4(value: &str, what: &str) -> Result<Ipv4Addr> {
    value
        .parse()
        .map_err(|e| Error::provider(PROVIDER, format!("Invalid {} '{}': {}", what, value, e)))
}

/// Convert a count to the API's integer type
fn api_count(count: usize, what: &str) -> Result<i32> {
    i32::try_from(count).map_err(|_| Error::config(format!("{} {} out of range", what, count)))
}

/// Interface view from an interface id, its (address, bound) pairs and attachment index
fn interface_view<'a>(
    interface_id: Option<&str>,
    addresses: impl Iterator<Item = (Option<&'a str>, bool)>,
    device_index: Option<i32>,
) -> Result<InterfaceView> {
    let interface_id =
        interface_id.ok_or_else(|| Error::provider(PROVIDER, "Interface without an identifier"))?;

    let mut private_addresses = Vec::new();
    for (address, has_public_binding) in addresses {
        let Some(address) = address else {
            continue;
        };
        private_addresses.push(PrivateAddress {
            address: parse_ipv4(address, "private address")?,
            has_public_binding,
        });
    }

    let mut view = InterfaceView::new(interface_id, private_addresses);
    view.device_index = device_index.and_then(|d| u32::try_from(d).ok());
    Ok(view)
}

/// Interface view from an interface embedded in an instance description
fn view_from_instance_interface(iface: &InstanceNetworkInterface) -> Result<InterfaceView> {
    interface_view(
        iface.network_interface_id(),
        iface
            .private_ip_addresses()
            .iter()
            .map(|p| (p.private_ip_address(), p.association().is_some())),
        iface.attachment().and_then(|a| a.device_index()),
    )
}

/// Interface view from a standalone interface description
fn view_from_interface(iface: &NetworkInterface) -> Result<InterfaceView> {
    interface_view(
        iface.network_interface_id(),
        iface
            .private_ip_addresses()
            .iter()
            .map(|p| (p.private_ip_address(), p.association().is_some())),
        iface.attachment().and_then(|a| a.device_index()),
    )
}

/// The one instance a DescribeInstances call returned
///
/// Zero or several instances for one identifier is an error.
fn single_instance<'a>(instance_id: &str, reservations: &'a [Reservation]) -> Result<&'a Instance> {
    let instances: Vec<&Instance> = reservations.iter().flat_map(|r| r.instances()).collect();

    match instances.as_slice() {
        [instance] => Ok(*instance),
        _ => Err(Error::provider(
            PROVIDER,
            format!(
                "Expected exactly 1 instance for {}, found {}",
                instance_id,
                instances.len()
            ),
        )),
    }
}

/// Instance description from a DescribeInstances result entry
fn description_from_instance(instance: &Instance) -> Result<InstanceDescription> {
    let instance_id = instance
        .instance_id()
        .ok_or_else(|| Error::provider(PROVIDER, "Instance without an identifier"))?;
    let hardware_class = instance
        .instance_type()
        .map(|t| t.as_str().to_string())
        .ok_or_else(|| Error::provider(PROVIDER, format!("{} has no instance type", instance_id)))?;
    let subnet_id = instance
        .subnet_id()
        .ok_or_else(|| Error::provider(PROVIDER, format!("{} is not in a subnet", instance_id)))?;

    let security_group_ids = instance
        .security_groups()
        .iter()
        .filter_map(|g| g.group_id().map(str::to_string))
        .collect();

    // Device ordering is applied when the snapshot is assembled.
    let interfaces = instance
        .network_interfaces()
        .iter()
        .map(view_from_instance_interface)
        .collect::<Result<Vec<_>>>()?;

    Ok(InstanceDescription {
        instance_id: instance_id.to_string(),
        hardware_class,
        subnet_id: subnet_id.to_string(),
        security_group_ids,
        interfaces,
    })
}

/// Public address record from a DescribeAddresses entry
fn record_from_address(address: &Address) -> Result<PublicAddressRecord> {
    let allocation_id = address
        .allocation_id()
        .ok_or_else(|| Error::provider(PROVIDER, "Address without an allocation id"))?;
    let public_ip = address
        .public_ip()
        .ok_or_else(|| Error::provider(PROVIDER, format!("{} has no public address", allocation_id)))?;

    Ok(PublicAddressRecord {
        allocation_id: allocation_id.to_string(),
        association_id: address.association_id().map(str::to_string),
        public_address: parse_ipv4(public_ip, "public address")?,
        private_address: address
            .private_ip_address()
            .map(|a| parse_ipv4(a, "private address"))
            .transpose()?,
        network_interface_id: address.network_interface_id().map(str::to_string),
    })
}

#[async_trait]
impl ControlPlane for Ec2ControlPlane {
    /// Fetch a metadata value through IMDSv2
    ///
    /// # API Calls
    ///
    /// ```http
    /// PUT /latest/api/token
    /// X-aws-ec2-metadata-token-ttl-seconds: 21600
    ///
    /// GET /latest/meta-data/{path}
    /// X-aws-ec2-metadata-token: <token>
    /// ```
    async fn instance_metadata(&self, path: &str) -> Result<String> {
        let token = self.metadata_token().await?;
        let url = format!(
            "{}/latest/meta-data/{}",
            self.metadata_endpoint,
            path.trim_start_matches('/')
        );

        let response = self
            .http
            .get(&url)
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Metadata request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return match status.as_u16() {
                404 => Err(Error::provider(
                    PROVIDER,
                    format!("Metadata path not found: {}", path),
                )),
                401 => Err(Error::provider(PROVIDER, "Metadata token rejected")),
                _ => Err(Error::provider(
                    PROVIDER,
                    format!("Metadata request for {} failed: {}", path, status),
                )),
            };
        }

        response
            .text()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("Failed to read metadata: {}", e)))
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<InstanceDescription> {
        let output = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeInstances", e))?;

        description_from_instance(single_instance(instance_id, output.reservations())?)
    }

    async fn describe_addresses(&self, instance_id: &str) -> Result<Vec<PublicAddressRecord>> {
        let output = self
            .client
            .describe_addresses()
            .filters(
                Filter::builder()
                    .name("instance-id")
                    .values(instance_id)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("DescribeAddresses", e))?;

        output.addresses().iter().map(record_from_address).collect()
    }

    async fn describe_interfaces(&self, interface_ids: &[String]) -> Result<Vec<InterfaceView>> {
        let output = self
            .client
            .describe_network_interfaces()
            .set_network_interface_ids(Some(interface_ids.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("DescribeNetworkInterfaces", e))?;

        output
            .network_interfaces()
            .iter()
            .map(view_from_interface)
            .collect()
    }

    async fn create_interface(&self, request: &CreateInterfaceRequest) -> Result<InterfaceView> {
        let secondary = api_count(request.secondary_address_count, "secondary address count")?;

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would create interface: {}",
                serde_json::json!({
                    "SubnetId": request.subnet_id,
                    "SecondaryPrivateIpAddressCount": secondary,
                    "Groups": request.security_group_ids,
                    "Description": request.description,
                })
            );
            // No addresses are known, so nothing downstream is bound.
            return Ok(InterfaceView::new(self.dry_run_handle("eni"), Vec::new()));
        }

        let output = self
            .client
            .create_network_interface()
            .subnet_id(&request.subnet_id)
            .secondary_private_ip_address_count(secondary)
            .set_groups(Some(request.security_group_ids.clone()))
            .description(&request.description)
            .send()
            .await
            .map_err(|e| sdk_error("CreateNetworkInterface", e))?;

        let iface = output
            .network_interface()
            .ok_or_else(|| Error::provider(PROVIDER, "CreateNetworkInterface returned no interface"))?;
        let view = view_from_interface(iface)?;

        tracing::debug!(
            "Created {} with {} private address(es)",
            view.interface_id,
            view.address_count()
        );
        Ok(view)
    }

    async fn attach_interface(&self, request: &AttachInterfaceRequest) -> Result<String> {
        let device_index = api_count(request.device_index as usize, "device index")?;

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would attach {} to {} at device index {}",
                request.interface_id,
                request.instance_id,
                device_index
            );
            return Ok(self.dry_run_handle("eni-attach"));
        }

        let output = self
            .client
            .attach_network_interface()
            .network_interface_id(&request.interface_id)
            .instance_id(&request.instance_id)
            .device_index(device_index)
            .send()
            .await
            .map_err(|e| sdk_error("AttachNetworkInterface", e))?;

        output
            .attachment_id()
            .map(str::to_string)
            .ok_or_else(|| Error::provider(PROVIDER, "AttachNetworkInterface returned no attachment id"))
    }

    async fn assign_secondary_addresses(&self, interface_id: &str, count: usize) -> Result<()> {
        let count = api_count(count, "secondary address count")?;

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would assign {} secondary address(es) to {}",
                count,
                interface_id
            );
            return Ok(());
        }

        self.client
            .assign_private_ip_addresses()
            .network_interface_id(interface_id)
            .secondary_private_ip_address_count(count)
            .send()
            .await
            .map_err(|e| sdk_error("AssignPrivateIpAddresses", e))?;
        Ok(())
    }

    async fn allocate_public_address(&self) -> Result<Allocation> {
        if self.dry_run {
            let allocation_id = self.dry_run_handle("eipalloc");
            tracing::info!("[DRY-RUN] Would allocate a VPC address ({})", allocation_id);
            return Ok(Allocation {
                allocation_id,
                public_address: Ipv4Addr::UNSPECIFIED,
            });
        }

        let output = self
            .client
            .allocate_address()
            .domain(DomainType::Vpc)
            .send()
            .await
            .map_err(|e| sdk_error("AllocateAddress", e))?;

        let allocation_id = output
            .allocation_id()
            .ok_or_else(|| Error::provider(PROVIDER, "AllocateAddress returned no allocation id"))?;
        let public_ip = output
            .public_ip()
            .ok_or_else(|| Error::provider(PROVIDER, "AllocateAddress returned no public address"))?;

        Ok(Allocation {
            allocation_id: allocation_id.to_string(),
            public_address: parse_ipv4(public_ip, "public address")?,
        })
    }

    async fn associate_address(&self, request: &AssociateAddressRequest) -> Result<String> {
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would associate {} with {} on {}",
                request.allocation_id,
                request.private_address,
                request.interface_id
            );
            return Ok(self.dry_run_handle("eipassoc"));
        }

        let output = self
            .client
            .associate_address()
            .allocation_id(&request.allocation_id)
            .network_interface_id(&request.interface_id)
            .private_ip_address(request.private_address.to_string())
            .send()
            .await
            .map_err(|e| sdk_error("AssociateAddress", e))?;

        output
            .association_id()
            .map(str::to_string)
            .ok_or_else(|| Error::provider(PROVIDER, "AssociateAddress returned no association id"))
    }

    async fn disassociate_address(&self, association_id: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!("[DRY-RUN] Would disassociate {}", association_id);
            return Ok(());
        }

        self.client
            .disassociate_address()
            .association_id(association_id)
            .send()
            .await
            .map_err(|e| sdk_error("DisassociateAddress", e))?;
        Ok(())
    }

    async fn release_public_address(&self, allocation_id: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!("[DRY-RUN] Would release {}", allocation_id);
            return Ok(());
        }

        self.client
            .release_address()
            .allocation_id(allocation_id)
            .send()
            .await
            .map_err(|e| sdk_error("ReleaseAddress", e))?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Factory for creating EC2 control-plane clients
pub struct Ec2Factory;

#[async_trait]
impl ControlPlaneFactory for Ec2Factory {
    async fn create(&self, config: &ControlPlaneConfig) -> Result<Box<dyn ControlPlane>> {
        match config {
            ControlPlaneConfig::Ec2 {
                region,
                endpoint_url,
                profile,
                dry_run,
            } => {
                config.validate()?;

                // Check for dry-run mode environment variable
                let dry_run = *dry_run
                    || std::env::var("ENI_MODE")
                        .unwrap_or_default()
                        .eq_ignore_ascii_case("dry-run");

                if dry_run {
                    tracing::warn!("EC2 control plane running in DRY-RUN mode - no changes will be made");
                }

                let control_plane = Ec2ControlPlane::connect(
                    region,
                    endpoint_url.as_deref(),
                    profile.as_deref(),
                    dry_run,
                )
                .await?;
                Ok(Box::new(control_plane))
            }
        }
    }
}
