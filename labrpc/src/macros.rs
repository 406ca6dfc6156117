#[macro_export]
macro_rules! service {
    () => {
        compile_error!("empty service is not allowed");
    };
    (
        $(#[$service_attr:meta])*
        service $svc_name:ident {
            $(
                $(#[$method_attr:meta])*
                fn $method_name:ident($($arg_id:ident: $arg_ty:ty),*) -> $output:ty;
            )*
        }
    ) => {
        #[allow(missing_docs)]
        $(#[$service_attr])*
        pub mod $svc_name {
            use super::*;

            use $crate::network::NetworkPackage;
            use $crate::{server, client};
            use $crate::server::Event;

            use $crate::tokio::sync::mpsc::{self, Sender, Receiver};
            use $crate::tokio::time::Interval;
            use $crate::serde_json;
            use $crate::serde::{Serialize, Deserialize};
            use $crate::anyhow::{Result, anyhow};
            use $crate::async_trait;
            use $crate::log::{trace, warn};


            #[derive(Debug, Deserialize, Serialize)]
            pub enum Request {
                $(
                    #[allow(non_camel_case_types)]
                    $method_name {  $($arg_id : $arg_ty),* }
                ),*
            }

            mod response {
                use super::*;
                $(
                    #[derive(Deserialize, Serialize)]
                    #[allow(non_camel_case_types)]
                    pub struct $method_name {
                        pub data: $output
                    }
                )*
            }

            #[async_trait]
            pub trait Service: Send + 'static {
                $(
                    $(#[$method_attr])*
                    async fn $method_name(&mut self, $($arg_id : $arg_ty),* ) -> Result<$output>;
                )*

                /// Period of `tick`, or `None` for a service that never ticks.
                fn tick_period(&self) -> Option<::std::time::Duration> {
                    None
                }

                /// Periodic work, run between requests on the same loop.
                async fn tick(&mut self) -> Result<()> {
                    Ok(())
                }
            }

            #[derive(Debug, Clone)]
            pub struct Client {
                server_id: String,
                tx: Sender<NetworkPackage>,
                timeout: ::std::time::Duration,
            }

            impl Client {

                $(
                    pub async fn $method_name(&self, $($arg_id : $arg_ty),* ) -> Result<$output> {
                        let req = Request::$method_name {
                            $($arg_id),*
                        };
                        let resp = self.call(serde_json::to_string(&req)?).await?;
                        let resp: response::$method_name = $crate::serde_json::from_str(&resp)?;
                        Ok(resp.data)
                    }
                )*

                pub fn server_id(&self) -> &str {
                    &self.server_id
                }

                pub fn with_timeout(mut self, timeout: ::std::time::Duration) -> Self {
                    self.timeout = timeout;
                    self
                }

                /// Fails when the request or its reply is lost, or on timeout.
                /// A failure says nothing about whether the server ran it.
                pub async fn call(&self, req: String) -> Result<String> {
                    let (tx, mut rx) = mpsc::channel(1);
                    let package = NetworkPackage{to: self.server_id.clone(), reply: tx, data: req.clone()};
                    let exchange = async {
                        self.tx.send(package).await?;
                        let resp = rx.recv().await.ok_or_else(|| anyhow!("unable to receive from server"))?;
                        Ok::<String, $crate::anyhow::Error>(resp)
                    };
                    let resp = $crate::tokio::time::timeout(self.timeout, exchange)
                        .await
                        .map_err(|_| anyhow!("call to {} timed out", self.server_id))??;
                    trace!("req: {}, resp: {}", req, &resp);
                    Ok(resp)
                }
            }

            impl client::Client for Client {
                fn from_server(server_id: String, net_tx: Sender<NetworkPackage>) -> Self {
                    Self {
                        server_id,
                        tx: net_tx,
                        timeout: client::DEFAULT_TIMEOUT,
                    }
                }
            }

            #[derive(Debug)]
            pub struct Server<T: Service + Send> {
                svc: T,
                tx: Sender<NetworkPackage>,
                rx: Receiver<NetworkPackage>,
                ticker: Option<Interval>,
            }

            #[async_trait]
            impl<T: Service + Send> server::Server for Server<T> {
                type Service = T;

                fn from_service(svc: Self::Service) -> Self {
                    let (tx, rx) = mpsc::channel(100);
                    let ticker = svc.tick_period().map(server::ticker);
                    Self {svc, tx, rx, ticker}
                }

                fn client_chan(&self) -> Sender<NetworkPackage> {
                    return self.tx.clone();
                }

                async fn handle(&mut self) -> Result<()> {
                    match server::next_event(&mut self.rx, self.ticker.as_mut()).await {
                        Event::Tick => self.svc.tick().await,
                        Event::Request(NetworkPackage{reply, data, ..}) => {
                            trace!("handle recv: {}", &data);
                            let req: Request = match serde_json::from_str(&data) {
                                Ok(req) => req,
                                Err(e) => {
                                    warn!("malformed request dropped: {}", e);
                                    return Ok(());
                                }
                            };
                            let resp = match req {
                                $(
                                    Request::$method_name { $($arg_id),* } => {
                                        let data = self.svc.$method_name($($arg_id),* ).await?;
                                        serde_json::to_string(&response::$method_name { data })?
                                    }
                                )*
                            };
                            trace!("handle send: {}", &resp);
                            if reply.send(resp).await.is_err() {
                                warn!("caller gone, reply dropped");
                            }
                            Ok(())
                        }
                        Event::Closed => Err(anyhow!("expected sender")),
                    }
                }
            }
        }
    };
}
