use crate::app::WorkspaceHandle;
use crate::app::dto::*;
use crate::domain::change::ChangeSet;
use crate::domain::graph::GraphExport;
use crate::domain::selector::TestSelection;
use rmcp::{
    Json, ServerHandler, ServiceExt, handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters, model::*, tool, tool_handler, tool_router,
    transport::stdio,
};

#[derive(Clone)]
pub struct ImpactMcpServer {
    handle: WorkspaceHandle,
    tool_router: ToolRouter<Self>,
}

impl ImpactMcpServer {
    pub fn new(handle: WorkspaceHandle) -> Self {
        Self {
            handle,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn serve_stdio(self) -> anyhow::Result<()> {
        let service = self.serve(stdio()).await?;
        service.waiting().await?;
        Ok(())
    }

    async fn run<R, F>(&self, f: F) -> Result<Json<R>, String>
    where
        R: Send + 'static,
        F: FnOnce(&mut crate::app::Workspace) -> anyhow::Result<R> + Send + 'static,
    {
        self.handle
            .call(f)
            .await
            .map_err(|e| e.to_string())?
            .map(Json)
            .map_err(|e| format!("{e:#}"))
    }
}

#[tool_router]
impl ImpactMcpServer {
    #[tool(description = "Workspace summary: file, element, edge and test counts.")]
    async fn health(&self) -> Result<Json<HealthResponse>, String> {
        self.run(|ws| Ok(ws.health())).await
    }

    #[tool(description = "Rebuild the dependency graph from every file in the workspace.")]
    async fn build_graph(&self) -> Result<Json<BuildResponse>, String> {
        self.run(|ws| ws.build_graph()).await
    }

    #[tool(description = "Reparse one file and replace its elements in the graph.")]
    async fn update_file(
        &self,
        params: Parameters<PathRequest>,
    ) -> Result<Json<UpdateFileResponse>, String> {
        let req = params.0;
        self.run(move |ws| ws.update_file(&req.path)).await
    }

    #[tool(description = "Diff one file against its last snapshot: added, modified and deleted elements.")]
    async fn detect_changes(
        &self,
        params: Parameters<PathRequest>,
    ) -> Result<Json<ChangeSet>, String> {
        let req = params.0;
        self.run(move |ws| ws.detect_changes(&req.path)).await
    }

    #[tool(description = "Report a file watcher event (created, modified or deleted).")]
    async fn file_event(
        &self,
        params: Parameters<FileEvent>,
    ) -> Result<Json<FileEventResponse>, String> {
        let event = params.0;
        self.run(move |ws| ws.handle_file_event(event)).await
    }

    #[tool(description = "Elements called by an element.")]
    async fn dependencies(
        &self,
        params: Parameters<ElementRequest>,
    ) -> Result<Json<NeighborsResponse>, String> {
        let req = params.0;
        self.run(move |ws| ws.dependencies(&req.id)).await
    }

    #[tool(description = "Elements that call an element.")]
    async fn dependents(
        &self,
        params: Parameters<ElementRequest>,
    ) -> Result<Json<NeighborsResponse>, String> {
        let req = params.0;
        self.run(move |ws| ws.dependents(&req.id)).await
    }

    #[tool(description = "Elements transitively depending on the given ones, with their tests.")]
    async fn test_impact(
        &self,
        params: Parameters<ImpactRequest>,
    ) -> Result<Json<ImpactResponse>, String> {
        let req = params.0;
        self.run(move |ws| Ok(ws.test_impact(&req))).await
    }

    #[tool(description = "Rank tests for changed elements and select them under an optional time budget.")]
    async fn select(&self, params: Parameters<SelectRequest>) -> Result<Json<TestSelection>, String> {
        let req = params.0;
        self.run(move |ws| Ok(ws.select(&req))).await
    }

    #[tool(description = "Detect changed files and select the tests to re-run.")]
    async fn affected(
        &self,
        params: Parameters<AffectedRequest>,
    ) -> Result<Json<AffectedResponse>, String> {
        let req = params.0;
        self.run(move |ws| ws.affected(&req)).await
    }

    #[tool(description = "Export the dependency graph as sorted node and edge lists.")]
    async fn export(&self) -> Result<Json<GraphExport>, String> {
        self.run(|ws| Ok(ws.export())).await
    }

    #[tool(description = "Record test execution results into the failure history.")]
    async fn record_results(
        &self,
        params: Parameters<RecordRequest>,
    ) -> Result<Json<RecordResponse>, String> {
        let req = params.0;
        self.run(move |ws| ws.record_results(&req.results)).await
    }
}

#[tool_handler]
impl ServerHandler for ImpactMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Track code-element dependencies in a workspace and select the tests affected by a change."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
