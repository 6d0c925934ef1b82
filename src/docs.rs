//! Static OpenAPI description of the HTTP surface, served at `/docs.json`.

use serde_json::{json, Value};

pub fn document() -> Value {
    json!({
        "openapi": "3.0.0",
        "info": {
            "title": "Cliquer API",
            "version": "1.0.0"
        },
        "paths": {
            "/builds": {
                "post": {
                    "summary": "Start a build of a flake target",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "required": ["target", "callback"],
                                    "properties": {
                                        "target": {
                                            "type": "string",
                                            "description": "github/gitlab/bitbucket flake uri",
                                            "example": "github:owner/repo"
                                        },
                                        "output": {
                                            "type": "string",
                                            "default": "default",
                                            "example": "default"
                                        },
                                        "callback": {
                                            "type": "string",
                                            "format": "uri",
                                            "description": "Endpoint receiving the artifact bytes"
                                        },
                                        "inputs": {
                                            "type": "object",
                                            "description": "Nested build inputs",
                                            "default": {}
                                        }
                                    }
                                }
                            }
                        }
                    },
                    "responses": {
                        "202": {
                            "description": "Build accepted",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {
                                            "buildId": { "type": "string" }
                                        }
                                    }
                                }
                            }
                        },
                        "400": { "description": "Validation failure" },
                        "404": { "description": "Target cannot be located (probe enabled)" }
                    }
                }
            },
            "/builds/{id}": {
                "get": {
                    "summary": "Poll the status of a build",
                    "parameters": [{
                        "name": "id",
                        "in": "path",
                        "required": true,
                        "schema": { "type": "string" }
                    }],
                    "responses": {
                        "200": {
                            "description": "Build status",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {
                                            "build": {
                                                "type": "object",
                                                "properties": {
                                                    "startedAt": { "type": "string", "format": "date-time" },
                                                    "buildInfo": {
                                                        "type": "object",
                                                        "properties": {
                                                            "status": {
                                                                "type": "string",
                                                                "enum": ["pending", "running", "succeeded", "failed", "timed-out"]
                                                            }
                                                        }
                                                    }
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        },
                        "404": { "description": "Unknown or expired build id" }
                    }
                }
            }
        }
    })
}
